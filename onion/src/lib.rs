//! Per-hop routing for the onion-routing TCP forwarder (component D) and
//! the bidirectional byte-copy that follows once a circuit is wired up
//! (component G). [`HopRouter`] is the single entry point a carrier's
//! server-side dispatch calls for every inbound `"connrequestv2"` channel.

pub mod error;
pub mod router;
pub mod splice;

pub use error::RelayError;
pub use router::{CircuitKind, HopRouter};

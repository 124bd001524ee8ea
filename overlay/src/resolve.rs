//! Client side of the overlay-DNS `Resolve` variant (§6.5): ask an exit to
//! resolve a hostname on its side of the chain instead of dialing it, so the
//! originator never performs the lookup itself.

use std::net::IpAddr;

use tracing::{debug, instrument};

use carrier::{ClientSelector, RESOLVE_CHANNEL_KIND};
use wire::{ConnectRequest, HostnameQuery, ResolveResponse};

use crate::config::OverlayConfig;
use crate::error::{OverlayError, ResolveError};
use crate::timeout::run_with_timeout;

/// Opens a circuit through `config.level` hops and asks the exit to resolve
/// `name`, the way [`crate::dial`] asks it to connect — same handshake and
/// chain-forwarding, but a single request/response instead of a splice.
#[instrument(skip(config, selector))]
pub fn resolve(config: &OverlayConfig, selector: &dyn ClientSelector, name: &str) -> Result<IpAddr, ResolveError> {
    let handle = selector.select_client().ok_or(OverlayError::NoClient)?;

    let request = ConnectRequest::originate(config.level);
    let mut payload = Vec::with_capacity(ConnectRequest::SIZE);
    request.write(&mut payload).map_err(OverlayError::from)?;
    let (channel, mut request_stream) = handle.open(RESOLVE_CHANNEL_KIND, &payload).map_err(OverlayError::from)?;
    request_stream.drain_and_discard().map_err(OverlayError::Io)?;

    debug!(level = config.level, %name, "opened resolve circuit, starting scrambler handshake");
    let timeout = config.handshake_timeout;
    let query = HostnameQuery { name: name.to_string() };
    let response = run_with_timeout(timeout, move || -> Result<ResolveResponse, OverlayError> {
        let mut duplex = scrambler::initiate(channel)?;
        query.write(&mut duplex)?;
        let response = ResolveResponse::read(&mut duplex)?;
        let _ = duplex.into_inner().close();
        Ok(response)
    })
    .map_err(OverlayError::from)??;

    match response {
        ResolveResponse::Found(ip) => Ok(ip),
        ResolveResponse::NotFound => Err(ResolveError::NotFound),
        ResolveResponse::NetworkError => Err(ResolveError::NetworkError),
    }
}

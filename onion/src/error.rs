use thiserror::Error;

/// The relay-side error taxonomy, matching one-for-one the causes named in
/// the protocol's error handling design: a relay never retries on any of
/// these, it tears the circuit down and lets the originator dial again.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no downstream carrier client available")]
    NoClient,
    #[error("scrambling handshake failed: {0}")]
    HandshakeFailure(#[from] scrambler::ScramblerError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("malformed wire message: {0}")]
    Wire(#[from] wire::WireError),
    #[error("carrier error: {0}")]
    Carrier(#[from] carrier::CarrierError),
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

use thiserror::Error;

/// The originator-side error taxonomy (see the error handling design this
/// mirrors one-for-one): a dial either succeeds with a live `Connection` or
/// fails with one of these; there is no retry at this layer.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("unsupported network {0:?}, must be tcp, tcp4 or tcp6")]
    UnsupportedNetwork(String),
    #[error("no downstream carrier client available")]
    NoClient,
    #[error("scrambling handshake failed: {0}")]
    HandshakeFailure(#[from] scrambler::ScramblerError),
    #[error("{0}")]
    HandshakeTimeout(#[from] crate::timeout::TimedOut),
    #[error("exit refused the connection")]
    ConnectRefused,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("malformed wire message: {0}")]
    Wire(#[from] wire::WireError),
    #[error("carrier error: {0}")]
    Carrier(#[from] carrier::CarrierError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the overlay-DNS `Resolve` variant (§6.5 / §4.E).
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("host not found")]
    NotFound,
    #[error("network error resolving at the exit")]
    NetworkError,
    #[error("dial failed before a resolve response could be read: {0}")]
    Dial(#[from] OverlayError),
}

/// Transport-level errors.
///
/// Everything here is recoverable from the protocol layer's point of view:
/// a failed shout or whisper is best-effort delivery doing its thing.
#[derive(Debug, thiserror::Error)]
pub enum SwmTransportError {
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("endpoint is not started")]
    NotStarted,

    #[error("endpoint event stream closed")]
    Closed,

    #[error("unknown peer: {0}")]
    UnknownPeer(String),
}

/// Client-level errors.
///
/// Wraps transport errors and adds protocol-specific variants. Decode
/// failures on inbound traffic never surface here — the dispatcher logs and
/// drops them; this type covers the function-call boundary only.
#[derive(Debug, thiserror::Error)]
pub enum SwmClientError {
    #[error("transport error: {0}")]
    Transport(#[from] swm_transport::SwmTransportError),

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("invalid envelope: {reason}")]
    Decode { reason: String },

    #[error("message has no correlation id (neither queryId nor UID)")]
    MissingCorrelationId,

    #[error("no pending query registered under id {id}")]
    UnknownQuery { id: String },

    #[error("timeout must be > 0")]
    InvalidTimeout,

    #[error("no reply to query {id} within {timeout_ms} ms")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("component is shut down")]
    ComponentDown,
}

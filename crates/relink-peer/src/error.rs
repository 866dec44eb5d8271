/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] relink_transport::TransportError),

    /// A send was attempted before the handshake completed.
    #[error("link is not paired yet")]
    NotPaired,

    /// A signal had to be sent but no target endpoint is configured.
    #[error("no target endpoint configured")]
    NoTarget,

    /// An inbound control signal had an unrecognized kind. Indicates a
    /// protocol version mismatch or a corrupted substrate; not recoverable
    /// locally.
    #[error("unknown control signal kind: {0}")]
    UnknownSignal(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

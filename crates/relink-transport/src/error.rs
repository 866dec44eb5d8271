/// Errors that can occur in transport operations.
///
/// Deliberately small: delivery to a destroyed endpoint and scope-mismatched
/// posts are silent drops, not errors, because the substrate is
/// send-and-forget.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A post was attempted on a channel port that has been closed locally.
    #[error("channel port is closed")]
    PortClosed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

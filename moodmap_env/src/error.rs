//! Error types for the MoodMap environment abstraction.

use thiserror::Error;

/// Errors raised by the external collaborators (document listener and
/// location provider).
#[derive(Debug, Clone, Error)]
pub enum EnvError {
    /// The remote listener or location feed ended or dropped its connection
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// Registering a listener failed (offline, permission denied, quota...)
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// The location provider rejected the request or reported a failure
    #[error("Location error: {0}")]
    Location(String),
}

impl EnvError {
    /// Creates a stream-closed error.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::StreamClosed(msg.into())
    }

    /// Creates a subscription error.
    pub fn subscription(msg: impl Into<String>) -> Self {
        Self::Subscription(msg.into())
    }

    /// Creates a location error.
    pub fn location(msg: impl Into<String>) -> Self {
        Self::Location(msg.into())
    }
}

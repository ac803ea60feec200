//! Error taxonomy shared by every bus backend.

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
///
/// Variants map one-to-one onto [`ErrorKind`] so callers can branch on the
/// category without matching message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Missing or malformed initialization parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend unreachable, not yet initialized, or connection lost.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Malformed request (empty topic, bad payload).
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Publish rejected by the backend.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Optional capability absent on this backend.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Application handler reported a failure for a delivered message.
    #[error("Handler failed: {0}")]
    Handler(String),
}

/// Error category, for matching without inspecting payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Validation,
    Delivery,
    NotSupported,
    Handler,
}

impl BusError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::Configuration(_) => ErrorKind::Configuration,
            BusError::Connection(_) => ErrorKind::Connection,
            BusError::Validation(_) => ErrorKind::Validation,
            BusError::Delivery(_) => ErrorKind::Delivery,
            BusError::NotSupported(_) => ErrorKind::NotSupported,
            BusError::Handler(_) => ErrorKind::Handler,
        }
    }

    /// Shorthand for a handler failure.
    pub fn handler(message: impl Into<String>) -> Self {
        BusError::Handler(message.into())
    }
}

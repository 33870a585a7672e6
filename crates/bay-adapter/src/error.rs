use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The runtime could not be reached (connect failure or timeout).
    /// Before readiness this means "keep polling"; after readiness it is a
    /// runtime failure.
    #[error("runtime unreachable: {0}")]
    Unreachable(String),

    /// The runtime answered with a non-2xx status.
    #[error("runtime error ({status}): {message}")]
    Runtime { status: u16, message: String },

    /// The requested workspace file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Meta validation failed; fatal for the session.
    #[error("invalid runtime meta: {0}")]
    MetaInvalid(String),

    #[error("internal adapter error: {0}")]
    Internal(String),
}

impl AdapterError {
    /// Connection-level failures are worth retrying; wire-level errors are not.
    pub fn is_connection(&self) -> bool {
        matches!(self, AdapterError::Unreachable(_))
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The referenced backend resource does not exist. Destroy/stop paths
    /// treat this as success; everyone else surfaces it.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The backend rejected the operation.
    #[error("backend error: {message}")]
    Backend { message: String, retryable: bool },

    /// The backend itself could not be reached. Always retryable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("internal driver error: {0}")]
    Internal(String),
}

impl DriverError {
    pub fn backend(message: impl Into<String>) -> Self {
        DriverError::Backend { message: message.into(), retryable: false }
    }

    pub fn retryable(&self) -> bool {
        match self {
            DriverError::NotFound(_) => false,
            DriverError::Backend { retryable, .. } => *retryable,
            DriverError::Unavailable(_) => true,
            DriverError::Internal(_) => false,
        }
    }
}

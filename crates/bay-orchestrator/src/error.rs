use bay_adapter::AdapterError;
use bay_domain::{Capability, DomainError};
use bay_driver::DriverError;
use bay_store::StoreError;
use thiserror::Error;

/// Public-taxonomy-shaped error for every orchestration operation.
/// The HTTP layer translates variants to status codes and wire codes;
/// raw store and driver errors never cross this boundary.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("capability '{0}' not supported by this sandbox's profile")]
    CapabilityNotSupported(Capability),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("sandbox is expired")]
    SandboxExpired,

    #[error("sandbox TTL is infinite")]
    SandboxTtlInfinite,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Transient: the session is converging. Carries a retry hint.
    #[error("session not ready: {message}")]
    SessionNotReady { message: String, retry_after_ms: u64 },

    /// The runtime failed after readiness was established.
    #[error("runtime error: {0}")]
    Ship(String),

    #[error("operation timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn not_ready(message: impl Into<String>) -> Self {
        OrchestratorError::SessionNotReady { message: message.into(), retry_after_ms: 2_000 }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => {
                OrchestratorError::NotFound(format!("{entity} '{id}'"))
            }
            StoreError::VersionConflict { .. } | StoreError::Duplicate { .. } => {
                OrchestratorError::Conflict("concurrent update, retry the request".into())
            }
            other => OrchestratorError::Internal(other.to_string()),
        }
    }
}

impl From<DriverError> for OrchestratorError {
    fn from(e: DriverError) -> Self {
        OrchestratorError::Internal(format!("container backend: {e}"))
    }
}

// Default mapping for capability calls made after readiness validation:
// connection failures are runtime errors, not retry-later hints. Readiness
// polling handles connection errors itself before ever converting.
impl From<AdapterError> for OrchestratorError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::FileNotFound(path) => OrchestratorError::FileNotFound(path),
            AdapterError::Runtime { message, .. } => OrchestratorError::Ship(message),
            AdapterError::Unreachable(message) => OrchestratorError::Ship(message),
            AdapterError::MetaInvalid(message) => OrchestratorError::Internal(message),
            AdapterError::Internal(message) => OrchestratorError::Internal(message),
        }
    }
}

impl From<DomainError> for OrchestratorError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidPath(message) => OrchestratorError::InvalidPath(message),
            other => OrchestratorError::Validation(other.to_string()),
        }
    }
}

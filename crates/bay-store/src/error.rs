use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("version conflict on {entity} {id}: concurrent update")]
    VersionConflict { entity: &'static str, id: String },

    /// A unique constraint rejected the write (e.g. a second live session
    /// for the same sandbox, or a lost idempotency-key insert race).
    #[error("unique constraint violated: {constraint}")]
    Duplicate { constraint: &'static str },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound { entity, id: id.into() }
    }
}

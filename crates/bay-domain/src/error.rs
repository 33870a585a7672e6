use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid profile '{profile}': {message}")]
    InvalidProfile { profile: String, message: String },

    #[error("profile '{profile}' has a dependency cycle among its containers")]
    DependencyCycle { profile: String },

    #[error("profile '{profile}' references unknown container '{container}'")]
    UnknownContainer { profile: String, container: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

use crate::error::DomainError;

/// Validate a caller-supplied workspace path.
///
/// Filesystem and browser operations take paths relative to the cargo mount.
/// Absolute paths, parent traversal and NUL bytes are rejected here before
/// anything reaches a runtime; runtimes validate again on their side.
pub fn validate_workspace_path(path: &str) -> Result<(), DomainError> {
    if path.is_empty() {
        return Err(DomainError::InvalidPath("path is empty".into()));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(DomainError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }
    if path.contains('\0') {
        return Err(DomainError::InvalidPath("path contains NUL byte".into()));
    }
    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(DomainError::InvalidPath(format!(
            "parent traversal not allowed: {path}"
        )));
    }
    Ok(())
}

use bay_domain::{Capability, RuntimeKind};
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// Major API version this adapter speaks. A runtime advertising a different
/// major is incompatible and fails its session at readiness.
pub const SUPPORTED_API_MAJOR: u32 = 1;

/// Answer to the runtime's `GET /meta` probe. Probed once at readiness,
/// validated against the profile, then cached until the session leaves
/// running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeMeta {
    pub mount_path: String,
    pub capabilities: Vec<Capability>,
    pub runtime_kind: RuntimeKind,
    /// `major.minor` string, e.g. `"1.2"`.
    pub api_version: String,
}

impl RuntimeMeta {
    pub fn api_major(&self) -> Option<u32> {
        self.api_version.split('.').next()?.parse().ok()
    }
}

/// Validate a first successful meta probe against what the profile declared
/// for the container. Failure is fatal for the session.
pub fn validate_meta(
    meta: &RuntimeMeta,
    expected_mount: &str,
    declared: &[Capability],
) -> Result<(), AdapterError> {
    if meta.mount_path != expected_mount {
        return Err(AdapterError::MetaInvalid(format!(
            "mount path '{}' does not match the conventional '{}'",
            meta.mount_path, expected_mount
        )));
    }
    if meta.api_major() != Some(SUPPORTED_API_MAJOR) {
        return Err(AdapterError::MetaInvalid(format!(
            "api version '{}' is incompatible (supported major: {})",
            meta.api_version, SUPPORTED_API_MAJOR
        )));
    }
    for cap in declared {
        if !meta.capabilities.contains(cap) {
            return Err(AdapterError::MetaInvalid(format!(
                "runtime does not provide declared capability '{cap}'"
            )));
        }
    }
    Ok(())
}

/// Result of a code or shell execution inside the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Result of one browser command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserStep {
    pub command: String,
    pub output: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

/// Result of an ordered browser batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserBatchOutcome {
    /// Per-step records in submission order; truncated at the first failure
    /// when stop-on-error was requested.
    pub steps: Vec<BrowserStep>,
    /// True iff every submitted step ran and succeeded.
    pub success: bool,
}

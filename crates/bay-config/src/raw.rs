use std::collections::HashMap;

use serde::Deserialize;

/// On-disk shape of the profile catalog. Converted into domain
/// [`bay_domain::Profile`]s with validation by the loader.
#[derive(Debug, Deserialize)]
pub struct RawProfilesFile {
    pub profiles: Vec<RawProfile>,
}

#[derive(Debug, Deserialize)]
pub struct RawProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    pub containers: Vec<RawContainer>,
    /// capability name → container name
    #[serde(default)]
    pub primary_for: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct RawContainer {
    pub name: String,
    pub image: String,
    /// "primary" | "sidecar"
    pub role: String,
    /// "ship" | "browser"
    pub runtime: String,
    pub port: u16,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub memory_bytes: Option<i64>,
    #[serde(default)]
    pub cpu_quota: Option<i64>,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

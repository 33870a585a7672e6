use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level service settings, loaded once at startup from YAML and passed
/// by reference into constructors. No global mutable state, no hot reload.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaySettings {
    /// Address the HTTP surface binds, e.g. `0.0.0.0:7100`.
    pub listen: String,
    /// Label identifying this service instance on backend resources.
    /// Defaults to a random suffix so parallel dev instances don't collide.
    pub instance: String,
    pub auth: AuthSettings,
    pub database: DatabaseSettings,
    pub driver: DriverSettings,
    pub runtime: RuntimeSettings,
    pub gc: GcSettings,
    pub defaults: DefaultSettings,
    /// Profile catalog file; `None` uses the built-in catalog.
    pub profiles_path: Option<PathBuf>,
}

impl Default for BaySettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7100".to_string(),
            instance: format!("bay-{}", &uuid::Uuid::new_v4().to_string()[..8]),
            auth: AuthSettings::default(),
            database: DatabaseSettings::default(),
            driver: DriverSettings::default(),
            runtime: RuntimeSettings::default(),
            gc: GcSettings::default(),
            defaults: DefaultSettings::default(),
            profiles_path: None,
        }
    }
}

impl BaySettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSettings {
    /// Bearer token required on every request. Mandatory unless `dev_mode`.
    pub token: Option<String>,
    /// Development mode: requests without a token are accepted and the
    /// owner is taken from the `X-Bay-Owner` header (default `anonymous`).
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    /// Postgres connection string. `None` selects the in-memory store
    /// (state is lost on restart; development only).
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverBackend {
    /// In-memory simulation; development and tests.
    Stub,
    /// Single-host container daemon.
    Docker,
    /// Cluster scheduler (Kubernetes API).
    Cluster,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverSettings {
    pub backend: DriverBackend,
    pub cluster: Option<ClusterSettings>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self { backend: DriverBackend::Docker, cluster: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSettings {
    pub api_server: String,
    pub namespace: String,
    pub token: String,
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default = "default_volume_size")]
    pub volume_size: String,
    #[serde(default)]
    pub insecure: bool,
}

fn default_volume_size() -> String {
    "2Gi".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSettings {
    /// Overall readiness-polling deadline per ensure-running call.
    pub readiness_deadline_secs: u64,
    /// First backoff step of the readiness poll.
    pub readiness_initial_backoff_ms: u64,
    /// Default per-call timeout for capability operations.
    pub call_timeout_secs: u64,
    /// Hard ceiling a caller-supplied timeout is clamped to.
    pub max_call_timeout_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            readiness_deadline_secs: 120,
            readiness_initial_backoff_ms: 250,
            call_timeout_secs: 30,
            max_call_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcSettings {
    pub idle_interval_secs: u64,
    pub expired_interval_secs: u64,
    pub orphan_cargo_interval_secs: u64,
    pub orphan_container_interval_secs: u64,
    pub idempotency_ttl_secs: u64,
    /// Take store leases before each task (multi-instance deployments).
    pub lease_enabled: bool,
    pub lease_ttl_secs: u64,
}

impl Default for GcSettings {
    fn default() -> Self {
        Self {
            idle_interval_secs: 60,
            expired_interval_secs: 60,
            orphan_cargo_interval_secs: 300,
            orphan_container_interval_secs: 300,
            idempotency_ttl_secs: 86_400,
            lease_enabled: false,
            lease_ttl_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultSettings {
    /// Idle timeout applied when a profile does not set its own.
    pub idle_timeout_secs: u64,
    /// Cap on live sandboxes per owner. `None` disables the quota.
    pub max_sandboxes_per_owner: Option<usize>,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self { idle_timeout_secs: 300, max_sandboxes_per_owner: None }
    }
}

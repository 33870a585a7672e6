use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::DriverError;

// Standard labels stamped on every Bay-managed backend resource. The
// orphan-container reaper keys on MANAGED + INSTANCE; SESSION maps a
// container back to its session row.
pub const LABEL_MANAGED: &str = "bay.managed";
pub const LABEL_INSTANCE: &str = "bay.instance";
pub const LABEL_OWNER: &str = "bay.owner";
pub const LABEL_SANDBOX: &str = "bay.sandbox-id";
pub const LABEL_SESSION: &str = "bay.session-id";
pub const LABEL_ROLE: &str = "bay.role";

#[derive(Debug, Clone)]
pub struct VolumeSpec {
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// A volume handle attached to a container at a fixed path.
#[derive(Debug, Clone)]
pub struct VolumeMount {
    pub handle: String,
    pub mount_path: String,
}

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Backend-unique container name, chosen by the session manager.
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    /// Port the runtime's HTTP server listens on inside the container.
    pub runtime_port: u16,
    pub memory_bytes: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub volumes: Vec<VolumeMount>,
    /// Session network handle for multi-container groups.
    pub network: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Cheap status probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Exited,
    NotFound,
    Unknown,
}

/// One backend container carrying this instance's label, as seen by the
/// orphan-container reaper.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub session_id: Option<String>,
    pub running: bool,
}

/// Abstraction over the container backend. The only component that talks
/// to it; everything above reasons in terms of these narrow operations.
///
/// Failure semantics: missing resources on destroy/stop are never errors;
/// every other failure carries a retryability hint via
/// [`DriverError::retryable`].
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Create a persistent volume; returns the backend handle.
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<String, DriverError>;

    /// Idempotent: a missing volume is success.
    async fn destroy_volume(&self, handle: &str) -> Result<(), DriverError>;

    /// Create a session-scoped network for multi-container groups; idempotent.
    async fn create_network(&self, session_id: &str) -> Result<String, DriverError>;

    /// Idempotent: a missing network is success.
    async fn destroy_network(&self, handle: &str) -> Result<(), DriverError>;

    /// Allocate (but do not start) a container; returns the container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DriverError>;

    /// Start a container and return the address its runtime is reachable on.
    /// Endpoint format depends on the backend (host-port mapping or pod IP).
    async fn start_container(&self, id: &str) -> Result<String, DriverError>;

    /// Graceful stop; idempotent.
    async fn stop_container(&self, id: &str) -> Result<(), DriverError>;

    /// Forced removal; idempotent.
    async fn destroy_container(&self, id: &str) -> Result<(), DriverError>;

    /// Cheap existence/liveness probe.
    async fn status(&self, id: &str) -> Result<ContainerStatus, DriverError>;

    /// Atomic multi-create: on any failure every already-created container
    /// is destroyed (best effort) before the error propagates.
    async fn create_multi(&self, specs: &[ContainerSpec]) -> Result<Vec<String>, DriverError> {
        let mut created: Vec<String> = Vec::with_capacity(specs.len());
        for spec in specs {
            match self.create_container(spec).await {
                Ok(id) => created.push(id),
                Err(e) => {
                    for id in &created {
                        if let Err(de) = self.destroy_container(id).await {
                            tracing::warn!(container_id = %id, error = %de,
                                "rollback destroy failed during create_multi");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    /// All backend containers labeled to this service instance.
    async fn list_containers(
        &self,
        instance: &str,
    ) -> Result<Vec<ContainerSummary>, DriverError>;
}

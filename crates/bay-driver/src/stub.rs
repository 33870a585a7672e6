use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::driver::{
    ContainerSpec, ContainerStatus, ContainerSummary, Driver, VolumeSpec, LABEL_INSTANCE,
    LABEL_SESSION,
};
use crate::error::DriverError;

#[derive(Debug, Clone)]
struct StubContainer {
    spec: ContainerSpec,
    running: bool,
    killed: bool,
}

#[derive(Debug, Default)]
struct StubState {
    volumes: HashSet<String>,
    networks: HashSet<String>,
    containers: HashMap<String, StubContainer>,
    fail_create: HashSet<String>,
    fail_start: HashSet<String>,
}

/// A driver that simulates the container backend in memory.
///
/// Used by development mode and by every orchestration test: no I/O, fully
/// deterministic, with injectable failure points and an overridable endpoint
/// so readiness probes can be pointed at a mock runtime server.
#[derive(Debug, Default)]
pub struct StubDriver {
    state: Mutex<StubState>,
    /// Endpoint returned from `start_container`. Tests point this at a
    /// wiremock server; the default is a synthetic unreachable address.
    endpoint: Mutex<Option<String>>,
    counter: AtomicU64,
}

impl StubDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// All started containers report this endpoint from now on.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        *self.endpoint.lock().unwrap() = Some(endpoint.into());
    }

    /// Make the next create of a container whose name contains this
    /// fragment fail. Generated names carry a session suffix, so tests
    /// match on the blueprint part.
    pub fn fail_create_of(&self, name_fragment: impl Into<String>) {
        self.state.lock().unwrap().fail_create.insert(name_fragment.into());
    }

    /// Make the next start of a container whose name contains this
    /// fragment fail.
    pub fn fail_start_of(&self, name_fragment: impl Into<String>) {
        self.state.lock().unwrap().fail_start.insert(name_fragment.into());
    }

    /// Simulate external termination: the container stays known to the
    /// backend but reports exited.
    pub fn kill(&self, id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.containers.get_mut(id) {
            Some(c) => {
                c.running = false;
                c.killed = true;
                true
            }
            None => false,
        }
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn network_count(&self) -> usize {
        self.state.lock().unwrap().networks.len()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().unwrap().volumes.len()
    }

    pub fn has_volume(&self, handle: &str) -> bool {
        self.state.lock().unwrap().volumes.contains(handle)
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n:04}")
    }
}

#[async_trait]
impl Driver for StubDriver {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<String, DriverError> {
        debug!(volume = %spec.name, "StubDriver: create_volume");
        self.state.lock().unwrap().volumes.insert(spec.name.clone());
        Ok(spec.name.clone())
    }

    async fn destroy_volume(&self, handle: &str) -> Result<(), DriverError> {
        debug!(volume = %handle, "StubDriver: destroy_volume");
        self.state.lock().unwrap().volumes.remove(handle);
        Ok(())
    }

    async fn create_network(&self, session_id: &str) -> Result<String, DriverError> {
        let handle = format!("bay-net-{session_id}");
        debug!(network = %handle, "StubDriver: create_network");
        self.state.lock().unwrap().networks.insert(handle.clone());
        Ok(handle)
    }

    async fn destroy_network(&self, handle: &str) -> Result<(), DriverError> {
        debug!(network = %handle, "StubDriver: destroy_network");
        self.state.lock().unwrap().networks.remove(handle);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        let mut state = self.state.lock().unwrap();
        if let Some(pattern) =
            state.fail_create.iter().find(|p| spec.name.contains(p.as_str())).cloned()
        {
            state.fail_create.remove(&pattern);
            return Err(DriverError::backend(format!(
                "injected create failure for '{}'",
                spec.name
            )));
        }
        let id = self.next_id("ctr");
        debug!(container_id = %id, name = %spec.name, "StubDriver: create_container");
        state.containers.insert(
            id.clone(),
            StubContainer { spec: spec.clone(), running: false, killed: false },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<String, DriverError> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .containers
            .get(id)
            .map(|c| c.spec.name.clone())
            .ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        if let Some(pattern) =
            state.fail_start.iter().find(|p| name.contains(p.as_str())).cloned()
        {
            state.fail_start.remove(&pattern);
            return Err(DriverError::backend(format!(
                "injected start failure for '{name}'"
            )));
        }
        let container = state.containers.get_mut(id).unwrap();
        container.running = true;
        let endpoint = self
            .endpoint
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("http://stub.invalid/{id}"));
        debug!(container_id = %id, endpoint = %endpoint, "StubDriver: start_container");
        Ok(endpoint)
    }

    async fn stop_container(&self, id: &str) -> Result<(), DriverError> {
        debug!(container_id = %id, "StubDriver: stop_container");
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(id) {
            c.running = false;
        }
        Ok(())
    }

    async fn destroy_container(&self, id: &str) -> Result<(), DriverError> {
        debug!(container_id = %id, "StubDriver: destroy_container");
        self.state.lock().unwrap().containers.remove(id);
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<ContainerStatus, DriverError> {
        let state = self.state.lock().unwrap();
        Ok(match state.containers.get(id) {
            Some(c) if c.running => ContainerStatus::Running,
            Some(_) => ContainerStatus::Exited,
            None => ContainerStatus::NotFound,
        })
    }

    async fn list_containers(
        &self,
        instance: &str,
    ) -> Result<Vec<ContainerSummary>, DriverError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| {
                c.spec.labels.get(LABEL_INSTANCE).map(String::as_str) == Some(instance)
            })
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                session_id: c.spec.labels.get(LABEL_SESSION).cloned(),
                running: c.running,
            })
            .collect())
    }
}

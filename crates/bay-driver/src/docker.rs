use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use futures::stream::StreamExt;
use tracing::{debug, info, warn};

use crate::driver::{
    ContainerSpec, ContainerStatus, ContainerSummary, Driver, VolumeSpec, LABEL_INSTANCE,
    LABEL_MANAGED, LABEL_SESSION,
};
use crate::error::DriverError;

/// Single-host backend speaking to a Docker (or Podman) daemon.
///
/// Endpoints are host-port mappings: the runtime port is published to an
/// ephemeral port on 127.0.0.1 and resolved by inspecting the container
/// after start. Session networks are bridge networks; containers in a group
/// additionally reach each other by container-name DNS on that network.
pub struct DockerDriver {
    docker: Docker,
    stop_timeout: i64,
    auto_pull: bool,
}

impl DockerDriver {
    /// Connect via local defaults (Unix socket / DOCKER_HOST) and verify
    /// the daemon answers a ping.
    pub async fn connect() -> Result<Self, DriverError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DriverError::Unavailable(format!("docker connect: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| DriverError::Unavailable(format!("docker ping: {e}")))?;
        info!("connected to container daemon");
        Ok(Self { docker, stop_timeout: 10, auto_pull: true })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), DriverError> {
        if !self.auto_pull {
            return Ok(());
        }
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        info!(image = %image, "pulling image");
        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions { from_image: image, ..Default::default() }),
            None,
            None,
        );
        while let Some(result) = stream.next().await {
            result.map_err(map_err)?;
        }
        Ok(())
    }
}

fn map_err(e: bollard::errors::Error) -> DriverError {
    match e {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, message } => {
            DriverError::NotFound(message)
        }
        bollard::errors::Error::DockerResponseServerError { status_code, message } => {
            DriverError::Backend { message, retryable: status_code >= 500 }
        }
        other => DriverError::Unavailable(other.to_string()),
    }
}

/// Missing resources are success on destroy/stop paths.
fn ignore_missing(result: Result<(), DriverError>) -> Result<(), DriverError> {
    match result {
        Err(DriverError::NotFound(_)) => Ok(()),
        other => other,
    }
}

#[async_trait]
impl Driver for DockerDriver {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<String, DriverError> {
        debug!(volume = %spec.name, "creating volume");
        let labels: HashMap<&str, &str> =
            spec.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let response = self
            .docker
            .create_volume(bollard::volume::CreateVolumeOptions {
                name: spec.name.as_str(),
                driver: "local",
                driver_opts: HashMap::new(),
                labels,
            })
            .await
            .map_err(map_err)?;
        Ok(response.name)
    }

    async fn destroy_volume(&self, handle: &str) -> Result<(), DriverError> {
        debug!(volume = %handle, "destroying volume");
        ignore_missing(
            self.docker
                .remove_volume(handle, Some(bollard::volume::RemoveVolumeOptions { force: true }))
                .await
                .map_err(map_err),
        )
    }

    async fn create_network(&self, session_id: &str) -> Result<String, DriverError> {
        let name = format!("bay-net-{session_id}");
        debug!(network = %name, "creating network");
        let mut labels = HashMap::new();
        labels.insert(LABEL_MANAGED, "true");
        let result = self
            .docker
            .create_network(bollard::network::CreateNetworkOptions {
                name: name.as_str(),
                driver: "bridge",
                labels,
                ..Default::default()
            })
            .await;
        match result {
            Ok(_) => Ok(name),
            // Already exists: idempotent create.
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }) => {
                Ok(name)
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn destroy_network(&self, handle: &str) -> Result<(), DriverError> {
        debug!(network = %handle, "destroying network");
        ignore_missing(self.docker.remove_network(handle).await.map_err(map_err))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        self.ensure_image(&spec.image).await?;

        let port_key = format!("{}/tcp", spec.runtime_port);
        let mut port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> =
            HashMap::new();
        // Empty host_port asks the daemon for an ephemeral port; the actual
        // mapping is read back in start_container.
        port_bindings.insert(
            port_key.clone(),
            Some(vec![bollard::service::PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(String::new()),
            }]),
        );
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let binds: Vec<String> = spec
            .volumes
            .iter()
            .map(|v| format!("{}:{}:rw", v.handle, v.mount_path))
            .collect();

        let host_config = bollard::service::HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            port_bindings: Some(port_bindings),
            memory: spec.memory_bytes,
            cpu_quota: spec.cpu_quota,
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let config = bollard::container::Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        debug!(name = %spec.name, image = %spec.image, "creating container");
        let response = self
            .docker
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: spec.name.as_str(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(map_err)?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<String, DriverError> {
        debug!(container_id = %id, "starting container");
        self.docker
            .start_container(id, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .map_err(map_err)?;

        // Resolve the ephemeral host port the daemon picked.
        let inspect = self
            .docker
            .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(map_err)?;
        let ports = inspect
            .network_settings
            .and_then(|ns| ns.ports)
            .unwrap_or_default();
        let binding = ports
            .values()
            .flatten()
            .flatten()
            .find(|b| b.host_port.as_deref().map_or(false, |p| !p.is_empty()))
            .cloned()
            .ok_or_else(|| {
                DriverError::backend(format!("container {id} has no published port"))
            })?;
        let host = binding.host_ip.filter(|h| !h.is_empty() && h != "0.0.0.0");
        let endpoint = format!(
            "http://{}:{}",
            host.as_deref().unwrap_or("127.0.0.1"),
            binding.host_port.unwrap_or_default()
        );
        info!(container_id = %id, endpoint = %endpoint, "container started");
        Ok(endpoint)
    }

    async fn stop_container(&self, id: &str) -> Result<(), DriverError> {
        debug!(container_id = %id, "stopping container");
        let result = self
            .docker
            .stop_container(
                id,
                Some(bollard::container::StopContainerOptions { t: self.stop_timeout }),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }) => {
                Ok(())
            }
            Err(e) => ignore_missing(Err(map_err(e))),
        }
    }

    async fn destroy_container(&self, id: &str) -> Result<(), DriverError> {
        debug!(container_id = %id, "destroying container");
        ignore_missing(
            self.docker
                .remove_container(
                    id,
                    Some(bollard::container::RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(map_err),
        )
    }

    async fn status(&self, id: &str) -> Result<ContainerStatus, DriverError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await;
        let inspect = match inspect {
            Ok(i) => i,
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                return Ok(ContainerStatus::NotFound);
            }
            Err(e) => {
                warn!(container_id = %id, error = %e, "status probe failed");
                return Err(map_err(e));
            }
        };
        Ok(match inspect.state {
            Some(state) if state.running.unwrap_or(false) => ContainerStatus::Running,
            Some(_) => ContainerStatus::Exited,
            None => ContainerStatus::Unknown,
        })
    }

    async fn list_containers(
        &self,
        instance: &str,
    ) -> Result<Vec<ContainerSummary>, DriverError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![
                format!("{LABEL_MANAGED}=true"),
                format!("{LABEL_INSTANCE}={instance}"),
            ],
        );
        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                session_id: c.labels.as_ref().and_then(|l| l.get(LABEL_SESSION).cloned()),
                running: c
                    .state
                    .map(|s| s.to_string())
                    .map_or(false, |s| s.eq_ignore_ascii_case("running")),
            })
            .collect())
    }
}

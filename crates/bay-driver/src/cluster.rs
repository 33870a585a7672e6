use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::driver::{
    ContainerSpec, ContainerStatus, ContainerSummary, Driver, VolumeSpec, LABEL_INSTANCE,
    LABEL_MANAGED, LABEL_SESSION,
};
use crate::error::DriverError;

/// Annotation carrying the runtime port from create to start, where the
/// endpoint is assembled from the pod IP.
const PORT_ANNOTATION: &str = "bay.runtime-port";

/// Static configuration for the cluster driver, injected at startup.
#[derive(Clone)]
pub struct ClusterDriverConfig {
    /// Kubernetes API server base URL, e.g. `https://10.0.0.1:6443`.
    pub api_server: String,
    pub namespace: String,
    /// Service-account bearer token.
    pub token: String,
    /// Storage class for cargo claims. `None` uses the cluster default.
    pub storage_class: Option<String>,
    /// Claim size request, e.g. `"2Gi"`.
    pub volume_size: String,
    /// Accept self-signed API-server certificates (in-cluster CAs).
    pub insecure: bool,
}

/// Cluster-scheduler backend speaking the Kubernetes REST API directly.
///
/// Volumes are PersistentVolumeClaims, containers are single-container pods,
/// endpoints are pod IPs on the flat cluster network. Session networks are
/// synthetic handles: pods already share a network namespace per cluster
/// policy, so create/destroy of a network touches nothing.
pub struct ClusterDriver {
    config: ClusterDriverConfig,
    client: reqwest::Client,
}

impl ClusterDriver {
    pub fn new(config: ClusterDriverConfig) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| DriverError::Internal(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url(&self, resource: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/{}",
            self.config.api_server, self.config.namespace, resource
        )
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, DriverError> {
        let resp = req
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| DriverError::Unavailable(format!("cluster api: {e}")))?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if status.as_u16() == 404 {
            let msg = body["message"].as_str().unwrap_or("not found").to_string();
            return Err(DriverError::NotFound(msg));
        }
        if !status.is_success() {
            let msg = body["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("cluster api returned {status}"));
            return Err(DriverError::Backend {
                message: msg,
                retryable: status.is_server_error() || status.as_u16() == 429,
            });
        }
        Ok(body)
    }

    async fn get_pod(&self, name: &str) -> Result<Value, DriverError> {
        self.send(self.client.get(self.url(&format!("pods/{name}")))).await
    }
}

#[async_trait]
impl Driver for ClusterDriver {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<String, DriverError> {
        debug!(claim = %spec.name, "creating persistent volume claim");
        let mut claim = json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": { "name": spec.name, "labels": spec.labels },
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "resources": { "requests": { "storage": self.config.volume_size } },
            },
        });
        if let Some(class) = &self.config.storage_class {
            claim["spec"]["storageClassName"] = json!(class);
        }
        let result = self
            .send(self.client.post(self.url("persistentvolumeclaims")).json(&claim))
            .await;
        match result {
            Ok(_) => Ok(spec.name.clone()),
            // Already exists: the claim from a prior attempt is reused.
            Err(DriverError::Backend { message, .. }) if message.contains("already exists") => {
                Ok(spec.name.clone())
            }
            Err(e) => Err(e),
        }
    }

    async fn destroy_volume(&self, handle: &str) -> Result<(), DriverError> {
        debug!(claim = %handle, "deleting persistent volume claim");
        match self
            .send(self.client.delete(self.url(&format!("persistentvolumeclaims/{handle}"))))
            .await
        {
            Ok(_) | Err(DriverError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_network(&self, session_id: &str) -> Result<String, DriverError> {
        // Pods share the flat cluster network; the handle only names the group.
        Ok(format!("bay-net-{session_id}"))
    }

    async fn destroy_network(&self, _handle: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        debug!(pod = %spec.name, image = %spec.image, "creating pod");
        let env: Vec<Value> = spec
            .env
            .iter()
            .map(|(k, v)| json!({ "name": k, "value": v }))
            .collect();
        let volume_mounts: Vec<Value> = spec
            .volumes
            .iter()
            .enumerate()
            .map(|(i, v)| json!({ "name": format!("cargo-{i}"), "mountPath": v.mount_path }))
            .collect();
        let volumes: Vec<Value> = spec
            .volumes
            .iter()
            .enumerate()
            .map(|(i, v)| {
                json!({
                    "name": format!("cargo-{i}"),
                    "persistentVolumeClaim": { "claimName": v.handle },
                })
            })
            .collect();

        let mut resources = json!({});
        if let Some(mem) = spec.memory_bytes {
            resources["limits"]["memory"] = json!(mem.to_string());
        }
        if let Some(cpu) = spec.cpu_quota {
            // CPU quota is microseconds per 100ms period; express as millicores.
            resources["limits"]["cpu"] = json!(format!("{}m", cpu / 100));
        }

        let pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": spec.name,
                "labels": spec.labels,
                "annotations": { PORT_ANNOTATION: spec.runtime_port.to_string() },
            },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": "runtime",
                    "image": spec.image,
                    "env": env,
                    "ports": [{ "containerPort": spec.runtime_port }],
                    "volumeMounts": volume_mounts,
                    "resources": resources,
                }],
                "volumes": volumes,
            },
        });

        self.send(self.client.post(self.url("pods")).json(&pod)).await?;
        Ok(spec.name.clone())
    }

    async fn start_container(&self, id: &str) -> Result<String, DriverError> {
        // Pods are scheduled on create; "start" resolves the assigned pod IP.
        // Readiness of the runtime itself is the session manager's probe.
        for attempt in 0..60u32 {
            let pod = self.get_pod(id).await?;
            let phase = pod["status"]["phase"].as_str().unwrap_or("");
            if phase == "Failed" {
                return Err(DriverError::backend(format!("pod {id} failed to schedule")));
            }
            if let Some(ip) = pod["status"]["podIP"].as_str() {
                let port = pod["metadata"]["annotations"][PORT_ANNOTATION]
                    .as_str()
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or_else(|| {
                        DriverError::Internal(format!("pod {id} missing runtime port annotation"))
                    })?;
                let endpoint = format!("http://{ip}:{port}");
                info!(pod = %id, endpoint = %endpoint, "pod started");
                return Ok(endpoint);
            }
            debug!(pod = %id, attempt, "waiting for pod ip");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Err(DriverError::Backend {
            message: format!("pod {id} received no ip within deadline"),
            retryable: true,
        })
    }

    async fn stop_container(&self, id: &str) -> Result<(), DriverError> {
        debug!(pod = %id, "stopping pod");
        let url = format!("{}?gracePeriodSeconds=10", self.url(&format!("pods/{id}")));
        match self.send(self.client.delete(url)).await {
            Ok(_) | Err(DriverError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn destroy_container(&self, id: &str) -> Result<(), DriverError> {
        debug!(pod = %id, "destroying pod");
        let url = format!("{}?gracePeriodSeconds=0", self.url(&format!("pods/{id}")));
        match self.send(self.client.delete(url)).await {
            Ok(_) | Err(DriverError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn status(&self, id: &str) -> Result<ContainerStatus, DriverError> {
        let pod = match self.get_pod(id).await {
            Ok(pod) => pod,
            Err(DriverError::NotFound(_)) => return Ok(ContainerStatus::NotFound),
            Err(e) => {
                warn!(pod = %id, error = %e, "status probe failed");
                return Err(e);
            }
        };
        Ok(match pod["status"]["phase"].as_str() {
            Some("Running") | Some("Pending") => ContainerStatus::Running,
            Some("Succeeded") | Some("Failed") => ContainerStatus::Exited,
            _ => ContainerStatus::Unknown,
        })
    }

    async fn list_containers(
        &self,
        instance: &str,
    ) -> Result<Vec<ContainerSummary>, DriverError> {
        let selector = format!("{LABEL_MANAGED}=true,{LABEL_INSTANCE}={instance}");
        let url = format!("{}?labelSelector={}", self.url("pods"), selector);
        let body = self.send(self.client.get(url)).await?;
        let items = body["items"].as_array().cloned().unwrap_or_default();
        Ok(items
            .iter()
            .map(|pod| {
                let labels: HashMap<String, String> = pod["metadata"]["labels"]
                    .as_object()
                    .map(|m| {
                        m.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                ContainerSummary {
                    id: pod["metadata"]["name"].as_str().unwrap_or_default().to_string(),
                    session_id: labels.get(LABEL_SESSION).cloned(),
                    running: pod["status"]["phase"].as_str() == Some("Running"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_driver(server: &MockServer) -> ClusterDriver {
        ClusterDriver::new(ClusterDriverConfig {
            api_server: server.uri(),
            namespace: "bay".into(),
            token: "test-token".into(),
            storage_class: None,
            volume_size: "1Gi".into(),
            insecure: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn create_volume_posts_claim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/bay/persistentvolumeclaims"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "kind": "PersistentVolumeClaim" })))
            .mount(&server)
            .await;

        let driver = test_driver(&server);
        let handle = driver
            .create_volume(&VolumeSpec { name: "bay-cargo-1".into(), labels: HashMap::new() })
            .await
            .unwrap();
        assert_eq!(handle, "bay-cargo-1");
    }

    #[tokio::test]
    async fn destroy_volume_tolerates_missing() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path_regex(r"^/api/v1/namespaces/bay/persistentvolumeclaims/.*$"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "not found" })))
            .mount(&server)
            .await;

        let driver = test_driver(&server);
        driver.destroy_volume("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn status_maps_pod_phases() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/bay/pods/alive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": { "phase": "Running" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/bay/pods/done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": { "phase": "Succeeded" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/bay/pods/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "gone" })))
            .mount(&server)
            .await;

        let driver = test_driver(&server);
        assert_eq!(driver.status("alive").await.unwrap(), ContainerStatus::Running);
        assert_eq!(driver.status("done").await.unwrap(), ContainerStatus::Exited);
        assert_eq!(driver.status("ghost").await.unwrap(), ContainerStatus::NotFound);
    }

    #[tokio::test]
    async fn start_container_resolves_pod_ip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/bay/pods/p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": { "annotations": { PORT_ANNOTATION: "8080" } },
                "status": { "phase": "Running", "podIP": "10.1.2.3" }
            })))
            .mount(&server)
            .await;

        let driver = test_driver(&server);
        let endpoint = driver.start_container("p1").await.unwrap();
        assert_eq!(endpoint, "http://10.1.2.3:8080");
    }

    #[tokio::test]
    async fn list_containers_reads_labels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/bay/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "metadata": {
                        "name": "bay-abc-main",
                        "labels": { LABEL_SESSION: "ses-1" }
                    },
                    "status": { "phase": "Running" }
                }]
            })))
            .mount(&server)
            .await;

        let driver = test_driver(&server);
        let listed = driver.list_containers("inst-a").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "bay-abc-main");
        assert_eq!(listed[0].session_id.as_deref(), Some("ses-1"));
        assert!(listed[0].running);
    }
}

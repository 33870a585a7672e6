use std::time::Duration;

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::AdapterError;
use crate::wire::{ExecOutcome, FsEntry, RuntimeMeta};

/// Client for the code-execution runtime: kernel host, shell executor and
/// filesystem server behind one HTTP port.
///
/// Holds a shared `reqwest::Client` (one per runtime kind, process-wide);
/// never construct a client per call.
pub struct ShipAdapter {
    endpoint: String,
    client: reqwest::Client,
    meta: OnceCell<RuntimeMeta>,
}

impl ShipAdapter {
    pub fn new(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self { endpoint: endpoint.into(), client, meta: OnceCell::new() }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Probe the runtime's meta endpoint. Readiness predicate: this succeeds.
    pub async fn meta(&self, timeout: Duration) -> Result<RuntimeMeta, AdapterError> {
        let url = format!("{}/meta", self.endpoint);
        let resp = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(connection_error)?;
        decode(resp).await
    }

    /// Meta, probed at most once per adapter and cached.
    pub async fn cached_meta(&self, timeout: Duration) -> Result<&RuntimeMeta, AdapterError> {
        self.meta.get_or_try_init(|| self.meta(timeout)).await
    }

    pub async fn exec_python(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecOutcome, AdapterError> {
        debug!(endpoint = %self.endpoint, "exec python");
        self.post(
            "exec/python",
            &json!({ "code": code, "timeout_ms": timeout.as_millis() as u64 }),
            timeout,
        )
        .await
    }

    pub async fn exec_shell(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutcome, AdapterError> {
        debug!(endpoint = %self.endpoint, "exec shell");
        self.post(
            "exec/shell",
            &json!({ "command": command, "timeout_ms": timeout.as_millis() as u64 }),
            timeout,
        )
        .await
    }

    pub async fn fs_read(&self, path: &str, timeout: Duration) -> Result<String, AdapterError> {
        #[derive(Deserialize)]
        struct Body {
            content: String,
        }
        let body: Body = self
            .post_fs("fs/read", &json!({ "path": path }), path, timeout)
            .await?;
        Ok(body.content)
    }

    pub async fn fs_write(
        &self,
        path: &str,
        content: &str,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let _: serde_json::Value = self
            .post("fs/write", &json!({ "path": path, "content": content }), timeout)
            .await?;
        Ok(())
    }

    pub async fn fs_list(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<FsEntry>, AdapterError> {
        #[derive(Deserialize)]
        struct Body {
            entries: Vec<FsEntry>,
        }
        let body: Body = self
            .post_fs("fs/list", &json!({ "path": path }), path, timeout)
            .await?;
        Ok(body.entries)
    }

    pub async fn fs_delete(&self, path: &str, timeout: Duration) -> Result<(), AdapterError> {
        let _: serde_json::Value = self
            .post_fs("fs/delete", &json!({ "path": path }), path, timeout)
            .await?;
        Ok(())
    }

    /// Binary-safe write: content travels base64-encoded.
    pub async fn fs_upload(
        &self,
        path: &str,
        content: &[u8],
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let _: serde_json::Value = self
            .post("fs/upload", &json!({ "path": path, "content_b64": encoded }), timeout)
            .await?;
        Ok(())
    }

    pub async fn fs_download(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, AdapterError> {
        #[derive(Deserialize)]
        struct Body {
            content_b64: String,
        }
        let body: Body = self
            .post_fs("fs/download", &json!({ "path": path }), path, timeout)
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(&body.content_b64)
            .map_err(|e| AdapterError::Internal(format!("invalid base64 from runtime: {e}")))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        route: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, AdapterError> {
        let url = format!("{}/{route}", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(connection_error)?;
        decode(resp).await
    }

    /// Filesystem routes report a missing workspace file as 404.
    async fn post_fs<T: DeserializeOwned>(
        &self,
        route: &str,
        body: &serde_json::Value,
        path: &str,
        timeout: Duration,
    ) -> Result<T, AdapterError> {
        match self.post(route, body, timeout).await {
            Err(AdapterError::Runtime { status: 404, .. }) => {
                Err(AdapterError::FileNotFound(path.to_string()))
            }
            other => other,
        }
    }
}

pub(crate) fn connection_error(e: reqwest::Error) -> AdapterError {
    AdapterError::Unreachable(e.to_string())
}

pub(crate) async fn decode<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, AdapterError> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| format!("runtime returned {status}"));
        return Err(AdapterError::Runtime { status: status.as_u16(), message });
    }
    resp.json::<T>()
        .await
        .map_err(|e| AdapterError::Internal(format!("malformed runtime response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bay_domain::{Capability, RuntimeKind, WORKSPACE_MOUNT};
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const T: Duration = Duration::from_secs(5);

    async fn meta_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "mount_path": WORKSPACE_MOUNT,
                "capabilities": ["python", "shell", "filesystem"],
                "runtime_kind": "ship",
                "api_version": "1.0",
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn meta_probe_decodes() {
        let server = meta_server().await;
        let adapter = ShipAdapter::new(server.uri(), reqwest::Client::new());
        let meta = adapter.meta(T).await.unwrap();
        assert_eq!(meta.mount_path, WORKSPACE_MOUNT);
        assert_eq!(meta.runtime_kind, RuntimeKind::Ship);
        assert!(meta.capabilities.contains(&Capability::Python));
    }

    #[tokio::test]
    async fn cached_meta_probes_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "mount_path": WORKSPACE_MOUNT,
                "capabilities": ["python"],
                "runtime_kind": "ship",
                "api_version": "1.0",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = ShipAdapter::new(server.uri(), reqwest::Client::new());
        adapter.cached_meta(T).await.unwrap();
        adapter.cached_meta(T).await.unwrap();
    }

    #[tokio::test]
    async fn exec_python_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exec/python"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "42\n",
                "stdout": "42\n",
                "stderr": "",
                "exit_code": 0,
                "success": true,
                "duration_ms": 13,
            })))
            .mount(&server)
            .await;

        let adapter = ShipAdapter::new(server.uri(), reqwest::Client::new());
        let outcome = adapter.exec_python("print(2*21)", T).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("42"));
    }

    #[tokio::test]
    async fn fs_404_maps_to_file_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fs/read"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({ "error": "no such file" })),
            )
            .mount(&server)
            .await;

        let adapter = ShipAdapter::new(server.uri(), reqwest::Client::new());
        let err = adapter.fs_read("missing.txt", T).await.unwrap_err();
        assert!(matches!(err, AdapterError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn runtime_error_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exec/shell"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({ "error": "kernel crashed" })),
            )
            .mount(&server)
            .await;

        let adapter = ShipAdapter::new(server.uri(), reqwest::Client::new());
        let err = adapter.exec_shell("true", T).await.unwrap_err();
        match err {
            AdapterError::Runtime { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "kernel crashed");
            }
            other => panic!("expected Runtime error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        // Nothing listens on this port.
        let adapter =
            ShipAdapter::new("http://127.0.0.1:1", reqwest::Client::new());
        let err = adapter.meta(Duration::from_millis(500)).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn upload_sends_base64() {
        let server = MockServer::start().await;
        let payload: &[u8] = &[0u8, 159, 146, 150];
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        Mock::given(method("POST"))
            .and(path("/fs/upload"))
            .and(body_json_string(
                serde_json::json!({ "path": "bin.dat", "content_b64": encoded }).to_string(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let adapter = ShipAdapter::new(server.uri(), reqwest::Client::new());
        adapter.fs_upload("bin.dat", payload, T).await.unwrap();
    }
}

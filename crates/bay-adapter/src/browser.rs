use std::time::Duration;

use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::AdapterError;
use crate::ship::{connection_error, decode};
use crate::wire::{BrowserBatchOutcome, BrowserStep, RuntimeMeta};

/// Client for the browser-automation runtime.
///
/// The command string is passed through verbatim: the runtime splits it into
/// arguments and injects its own session and profile flags. Bay never
/// prepends a prefix.
pub struct BrowserAdapter {
    endpoint: String,
    client: reqwest::Client,
    meta: OnceCell<RuntimeMeta>,
}

impl BrowserAdapter {
    pub fn new(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self { endpoint: endpoint.into(), client, meta: OnceCell::new() }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

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

    pub async fn cached_meta(&self, timeout: Duration) -> Result<&RuntimeMeta, AdapterError> {
        self.meta.get_or_try_init(|| self.meta(timeout)).await
    }

    pub async fn exec(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<BrowserStep, AdapterError> {
        debug!(endpoint = %self.endpoint, "exec browser command");
        let url = format!("{}/exec", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "command": command, "timeout_ms": timeout.as_millis() as u64 }))
            .timeout(timeout)
            .send()
            .await
            .map_err(connection_error)?;
        decode(resp).await
    }

    /// Ordered batch. The overall timeout bounds the whole batch; the
    /// runtime truncates after the first failure when `stop_on_error`.
    pub async fn exec_batch(
        &self,
        commands: &[String],
        timeout: Duration,
        stop_on_error: bool,
    ) -> Result<BrowserBatchOutcome, AdapterError> {
        debug!(endpoint = %self.endpoint, steps = commands.len(), "exec browser batch");
        let url = format!("{}/exec_batch", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "commands": commands,
                "timeout_ms": timeout.as_millis() as u64,
                "stop_on_error": stop_on_error,
            }))
            .timeout(timeout)
            .send()
            .await
            .map_err(connection_error)?;
        decode(resp).await
    }
}

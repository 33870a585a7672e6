use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use bay_adapter::{AdapterPool, BrowserBatchOutcome, BrowserStep, ExecOutcome, FsEntry};
use bay_config::{ProfileCatalog, RuntimeSettings};
use bay_domain::{validate_workspace_path, Capability, ExecType, Owner, SandboxId};
use bay_store::{ContainerState, SandboxRecord, SessionRecord};
use tracing::warn;

use crate::error::OrchestratorError;
use crate::history::HistoryService;
use crate::sandbox::SandboxManager;

/// Routes a (sandbox, capability, operation) triple to the adapter of the
/// container advertising that capability: verifies the profile, converges
/// the session, invokes the operation, persists execution history for
/// coded/run capabilities, and touches session activity.
pub struct CapabilityRouter {
    sandboxes: Arc<SandboxManager>,
    catalog: Arc<ProfileCatalog>,
    pool: Arc<AdapterPool>,
    history: Arc<HistoryService>,
    runtime: RuntimeSettings,
}

struct Routed {
    sandbox: SandboxRecord,
    session: SessionRecord,
    container_id: String,
    endpoint: String,
}

impl CapabilityRouter {
    pub fn new(
        sandboxes: Arc<SandboxManager>,
        catalog: Arc<ProfileCatalog>,
        pool: Arc<AdapterPool>,
        history: Arc<HistoryService>,
        runtime: RuntimeSettings,
    ) -> Self {
        Self { sandboxes, catalog, pool, history, runtime }
    }

    // ── Code execution ────────────────────────────────────────────────────────

    pub async fn exec_python(
        &self,
        owner: &Owner,
        id: &SandboxId,
        code: &str,
        timeout_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<ExecOutcome, OrchestratorError> {
        let routed = self.route(owner, id, Capability::Python, now).await?;
        let timeout = self.effective_timeout(timeout_ms);
        let adapter = self.pool.ship(&routed.container_id, &routed.endpoint);
        let outcome = adapter.exec_python(code, timeout).await?;
        self.after_call(owner, &routed, ExecType::Python, code, Some(&outcome), now).await;
        Ok(outcome)
    }

    pub async fn exec_shell(
        &self,
        owner: &Owner,
        id: &SandboxId,
        command: &str,
        timeout_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<ExecOutcome, OrchestratorError> {
        let routed = self.route(owner, id, Capability::Shell, now).await?;
        let timeout = self.effective_timeout(timeout_ms);
        let adapter = self.pool.ship(&routed.container_id, &routed.endpoint);
        let outcome = adapter.exec_shell(command, timeout).await?;
        self.after_call(owner, &routed, ExecType::Shell, command, Some(&outcome), now).await;
        Ok(outcome)
    }

    // ── Filesystem ────────────────────────────────────────────────────────────

    pub async fn fs_read(
        &self,
        owner: &Owner,
        id: &SandboxId,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<String, OrchestratorError> {
        validate_workspace_path(path)?;
        let routed = self.route(owner, id, Capability::Filesystem, now).await?;
        let adapter = self.pool.ship(&routed.container_id, &routed.endpoint);
        let content = adapter.fs_read(path, self.effective_timeout(None)).await?;
        self.touch(&routed).await;
        Ok(content)
    }

    pub async fn fs_write(
        &self,
        owner: &Owner,
        id: &SandboxId,
        path: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        validate_workspace_path(path)?;
        let routed = self.route(owner, id, Capability::Filesystem, now).await?;
        let adapter = self.pool.ship(&routed.container_id, &routed.endpoint);
        adapter.fs_write(path, content, self.effective_timeout(None)).await?;
        self.touch(&routed).await;
        Ok(())
    }

    pub async fn fs_list(
        &self,
        owner: &Owner,
        id: &SandboxId,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<FsEntry>, OrchestratorError> {
        validate_workspace_path(path)?;
        let routed = self.route(owner, id, Capability::Filesystem, now).await?;
        let adapter = self.pool.ship(&routed.container_id, &routed.endpoint);
        let entries = adapter.fs_list(path, self.effective_timeout(None)).await?;
        self.touch(&routed).await;
        Ok(entries)
    }

    pub async fn fs_delete(
        &self,
        owner: &Owner,
        id: &SandboxId,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        validate_workspace_path(path)?;
        let routed = self.route(owner, id, Capability::Filesystem, now).await?;
        let adapter = self.pool.ship(&routed.container_id, &routed.endpoint);
        adapter.fs_delete(path, self.effective_timeout(None)).await?;
        self.touch(&routed).await;
        Ok(())
    }

    pub async fn fs_upload(
        &self,
        owner: &Owner,
        id: &SandboxId,
        path: &str,
        content: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        validate_workspace_path(path)?;
        let routed = self.route(owner, id, Capability::Filesystem, now).await?;
        let adapter = self.pool.ship(&routed.container_id, &routed.endpoint);
        adapter.fs_upload(path, content, self.effective_timeout(None)).await?;
        self.touch(&routed).await;
        Ok(())
    }

    pub async fn fs_download(
        &self,
        owner: &Owner,
        id: &SandboxId,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>, OrchestratorError> {
        validate_workspace_path(path)?;
        let routed = self.route(owner, id, Capability::Filesystem, now).await?;
        let adapter = self.pool.ship(&routed.container_id, &routed.endpoint);
        let bytes = adapter.fs_download(path, self.effective_timeout(None)).await?;
        self.touch(&routed).await;
        Ok(bytes)
    }

    // ── Browser ───────────────────────────────────────────────────────────────

    pub async fn browser_exec(
        &self,
        owner: &Owner,
        id: &SandboxId,
        command: &str,
        timeout_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<BrowserStep, OrchestratorError> {
        let routed = self.route(owner, id, Capability::Browser, now).await?;
        let timeout = self.effective_timeout(timeout_ms);
        let adapter = self.pool.browser(&routed.container_id, &routed.endpoint);
        let step = adapter.exec(command, timeout).await?;
        self.record_browser(owner, &routed, ExecType::Browser, command, &step, now).await;
        self.touch(&routed).await;
        Ok(step)
    }

    pub async fn browser_batch(
        &self,
        owner: &Owner,
        id: &SandboxId,
        commands: &[String],
        timeout_ms: Option<u64>,
        stop_on_error: bool,
        now: DateTime<Utc>,
    ) -> Result<BrowserBatchOutcome, OrchestratorError> {
        if commands.is_empty() {
            return Err(OrchestratorError::Validation("commands must not be empty".into()));
        }
        let routed = self.route(owner, id, Capability::Browser, now).await?;
        let timeout = self.effective_timeout(timeout_ms);
        let adapter = self.pool.browser(&routed.container_id, &routed.endpoint);
        let batch = adapter.exec_batch(commands, timeout, stop_on_error).await?;

        // One row for the whole batch.
        let input = serde_json::to_string(commands).unwrap_or_default();
        let output = serde_json::to_string(&batch.steps).unwrap_or_default();
        let duration: u64 = batch.steps.iter().map(|s| s.duration_ms).sum();
        if let Err(e) = self
            .history
            .record(
                owner,
                &routed.sandbox.id,
                ExecType::BrowserBatch,
                input,
                Some(output),
                None,
                None,
                None,
                batch.success,
                duration,
                now,
            )
            .await
        {
            warn!(sandbox_id = %routed.sandbox.id, error = %e, "history write failed");
        }
        self.touch(&routed).await;
        Ok(batch)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Verify the capability, converge the session, and pick the serving
    /// container. A request routed to a dead container in a degraded
    /// session gets one in-place recovery attempt; if that fails it errors
    /// retryably while healthy containers keep serving.
    async fn route(
        &self,
        owner: &Owner,
        id: &SandboxId,
        cap: Capability,
        now: DateTime<Utc>,
    ) -> Result<Routed, OrchestratorError> {
        let (sandbox, _status) = self.sandboxes.get(owner, id, now).await?;
        let profile = self.catalog.get(&sandbox.profile_id).cloned().ok_or_else(|| {
            OrchestratorError::Internal(format!(
                "profile '{}' missing from catalog",
                sandbox.profile_id
            ))
        })?;
        if !profile.supports(cap) {
            return Err(OrchestratorError::CapabilityNotSupported(cap));
        }

        let (sandbox, mut session) = self.sandboxes.ensure_running(owner, id, now).await?;

        let blueprint = profile
            .container_for(cap)
            .ok_or(OrchestratorError::CapabilityNotSupported(cap))?;
        let container = session.container(&blueprint.name).ok_or_else(|| {
            OrchestratorError::Internal(format!(
                "session is missing container '{}'",
                blueprint.name
            ))
        })?;
        if container.observed_state != ContainerState::Running {
            // This request needs the dead container: one in-place recovery
            // attempt. Failure surfaces retryably; healthy capabilities are
            // unaffected either way.
            session = self
                .sandboxes
                .recover_container(owner, id, &blueprint.name, now)
                .await
                .map_err(|e| match e {
                    retryable @ OrchestratorError::SessionNotReady { .. } => retryable,
                    client @ (OrchestratorError::NotFound(_)
                    | OrchestratorError::SandboxExpired) => client,
                    other => OrchestratorError::SessionNotReady {
                        message: format!("recovery of '{cap}' container failed: {other}"),
                        retry_after_ms: 3_000,
                    },
                })?;
        }
        let container = session.container(&blueprint.name).ok_or_else(|| {
            OrchestratorError::Internal(format!(
                "session is missing container '{}'",
                blueprint.name
            ))
        })?;
        let (container_id, endpoint) = match (&container.container_id, &container.endpoint) {
            (Some(cid), Some(ep)) => (cid.clone(), ep.clone()),
            _ => {
                return Err(OrchestratorError::not_ready(format!(
                    "container serving '{cap}' has no endpoint yet"
                )));
            }
        };
        Ok(Routed { sandbox, session, container_id, endpoint })
    }

    fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let max = Duration::from_secs(self.runtime.max_call_timeout_secs);
        match requested_ms {
            Some(ms) => Duration::from_millis(ms).min(max),
            None => Duration::from_secs(self.runtime.call_timeout_secs).min(max),
        }
    }

    /// Post-call bookkeeping for code/shell executions: history row plus
    /// activity touch. Failures here never fail the caller's operation.
    async fn after_call(
        &self,
        owner: &Owner,
        routed: &Routed,
        exec_type: ExecType,
        input: &str,
        outcome: Option<&ExecOutcome>,
        now: DateTime<Utc>,
    ) {
        if let Some(outcome) = outcome {
            if let Err(e) = self
                .history
                .record(
                    owner,
                    &routed.sandbox.id,
                    exec_type,
                    input.to_string(),
                    Some(outcome.output.clone()),
                    Some(outcome.stdout.clone()),
                    Some(outcome.stderr.clone()),
                    outcome.exit_code,
                    outcome.success,
                    outcome.duration_ms,
                    now,
                )
                .await
            {
                warn!(sandbox_id = %routed.sandbox.id, error = %e, "history write failed");
            }
        }
        self.touch(routed).await;
    }

    async fn record_browser(
        &self,
        owner: &Owner,
        routed: &Routed,
        exec_type: ExecType,
        input: &str,
        step: &BrowserStep,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self
            .history
            .record(
                owner,
                &routed.sandbox.id,
                exec_type,
                input.to_string(),
                Some(step.output.clone()),
                None,
                None,
                step.exit_code,
                step.success,
                step.duration_ms,
                now,
            )
            .await
        {
            warn!(sandbox_id = %routed.sandbox.id, error = %e, "history write failed");
        }
    }

    async fn touch(&self, routed: &Routed) {
        if let Err(e) = self.sandboxes.touch(&routed.sandbox.id, &routed.session.id).await {
            warn!(sandbox_id = %routed.sandbox.id, error = %e, "activity touch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryQuery;
    use crate::testutil::TestBay;
    use bay_store::StateStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn router(bay: &TestBay) -> CapabilityRouter {
        CapabilityRouter::new(
            bay.sandboxes.clone(),
            bay.catalog.clone(),
            bay.pool.clone(),
            Arc::new(HistoryService::new(bay.store.clone())),
            RuntimeSettings {
                readiness_deadline_secs: 5,
                readiness_initial_backoff_ms: 20,
                call_timeout_secs: 5,
                max_call_timeout_secs: 30,
            },
        )
    }

    async fn mount_exec_routes(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/exec/python"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "42\n", "stdout": "42\n", "stderr": "",
                "exit_code": 0, "success": true, "duration_ms": 9,
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/exec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "command": "open https://example.com", "output": "opened",
                "success": true, "exit_code": 0, "duration_ms": 50,
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/exec_batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "steps": [
                    { "command": "open https://example.com", "output": "ok",
                      "success": true, "exit_code": 0, "duration_ms": 80 },
                    { "command": "bad-subcommand", "output": "unknown subcommand",
                      "success": false, "exit_code": 2, "duration_ms": 5 },
                ],
                "success": false,
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn exec_python_lazily_starts_and_records_history() {
        let (bay, server) = TestBay::with_ready_runtime().await;
        mount_exec_routes(&server).await;
        let router = router(&bay);
        let owner = TestBay::owner();
        let record = bay.create_sandbox("python-default", None).await;

        // No session yet: a single call converges and executes.
        let outcome = router
            .exec_python(&owner, &record.id, "print(2*21)", None, Utc::now())
            .await
            .unwrap();
        assert!(outcome.output.contains("42"));

        let rows = router
            .history
            .list(&owner, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exec_type, ExecType::Python);
        assert!(rows[0].success);

        // Activity moved forward.
        let sandbox = bay.store.get_sandbox(&record.id).await.unwrap().unwrap();
        assert!(sandbox.last_activity > record.last_activity);
        assert!(sandbox.idle_expires_at.is_some());
    }

    #[tokio::test]
    async fn capability_not_in_profile_is_a_client_error() {
        let (bay, _server) = TestBay::with_ready_runtime().await;
        let router = router(&bay);
        let record = bay.create_sandbox("python-default", None).await;

        let err = router
            .browser_exec(&TestBay::owner(), &record.id, "open x", None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CapabilityNotSupported(Capability::Browser)));
        // Rejected before any compute was started.
        assert_eq!(bay.driver.container_count(), 0);
    }

    #[tokio::test]
    async fn bad_paths_rejected_before_any_runtime_call() {
        let (bay, _server) = TestBay::with_ready_runtime().await;
        let router = router(&bay);
        let record = bay.create_sandbox("python-default", None).await;

        for bad in ["/etc/passwd", "../secrets", "a/../../b", ""] {
            let err = router
                .fs_read(&TestBay::owner(), &record.id, bad, Utc::now())
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::InvalidPath(_)), "path: {bad}");
        }
        assert_eq!(bay.driver.container_count(), 0);
    }

    #[tokio::test]
    async fn missing_file_maps_to_file_not_found() {
        let (bay, server) = TestBay::with_ready_runtime().await;
        Mock::given(method("POST"))
            .and(path("/fs/read"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({ "error": "no such file" })),
            )
            .mount(&server)
            .await;
        let router = router(&bay);
        let record = bay.create_sandbox("python-default", None).await;

        let err = router
            .fs_read(&TestBay::owner(), &record.id, "missing.txt", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn browser_batch_persists_one_row() {
        let (bay, server) = TestBay::with_ready_runtime().await;
        mount_exec_routes(&server).await;
        let router = router(&bay);
        let owner = TestBay::owner();
        let record = bay.create_sandbox("python-browser", None).await;

        let commands = vec![
            "open https://example.com".to_string(),
            "bad-subcommand".to_string(),
            "snapshot -i".to_string(),
        ];
        let batch = router
            .browser_batch(&owner, &record.id, &commands, None, true, Utc::now())
            .await
            .unwrap();
        assert!(!batch.success);
        assert_eq!(batch.steps.len(), 2, "third command never ran");

        let rows = router.history.list(&owner, HistoryQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exec_type, ExecType::BrowserBatch);
        assert!(!rows[0].success);
    }

    #[tokio::test]
    async fn dead_sidecar_is_replaced_by_the_request_that_needs_it() {
        let (bay, server) = TestBay::with_ready_runtime().await;
        mount_exec_routes(&server).await;
        let router = router(&bay);
        let owner = TestBay::owner();
        let record = bay.create_sandbox("python-browser", None).await;

        let (_, session) = bay
            .sandboxes
            .ensure_running(&owner, &record.id, Utc::now())
            .await
            .unwrap();
        let browser_id = session
            .container("browser")
            .and_then(|c| c.container_id.clone())
            .unwrap();
        bay.driver.kill(&browser_id);

        // The request needing the dead container triggers in-place recovery
        // and then serves.
        let step = router
            .browser_exec(&owner, &record.id, "open https://example.com", None, Utc::now())
            .await
            .unwrap();
        assert!(step.success);

        let healed = bay.store.get_live_session(&record.id).await.unwrap().unwrap();
        let replacement = healed
            .container("browser")
            .and_then(|c| c.container_id.clone())
            .unwrap();
        assert_ne!(browser_id, replacement);
        assert_eq!(healed.observed_state, bay_domain::SessionState::Running);
    }

    #[tokio::test]
    async fn failed_recovery_degrades_retryably_but_primary_serves() {
        let (bay, server) = TestBay::with_ready_runtime().await;
        mount_exec_routes(&server).await;
        let router = router(&bay);
        let owner = TestBay::owner();
        let record = bay.create_sandbox("python-browser", None).await;

        let (_, session) = bay
            .sandboxes
            .ensure_running(&owner, &record.id, Utc::now())
            .await
            .unwrap();
        let browser_id = session
            .container("browser")
            .and_then(|c| c.container_id.clone())
            .unwrap();
        bay.driver.kill(&browser_id);
        bay.driver.fail_start_of("browser");

        // Recovery fails: the dead sidecar's capability errors retryably.
        let err = router
            .browser_exec(&owner, &record.id, "open x", None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionNotReady { .. }));

        // The healthy primary keeps serving.
        let outcome = router
            .exec_python(&owner, &record.id, "print(2*21)", None, Utc::now())
            .await
            .unwrap();
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn timeouts_are_clamped_to_the_ceiling() {
        let (bay, _server) = TestBay::with_ready_runtime().await;
        let router = router(&bay);
        assert_eq!(router.effective_timeout(None), Duration::from_secs(5));
        assert_eq!(router.effective_timeout(Some(1_000)), Duration::from_secs(1));
        assert_eq!(router.effective_timeout(Some(3_600_000)), Duration::from_secs(30));
    }
}

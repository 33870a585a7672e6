use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use bay_adapter::{validate_meta, AdapterError, AdapterPool, RuntimeMeta};
use bay_config::{ProfileCatalog, RuntimeSettings};
use bay_domain::{
    ContainerBlueprint, DesiredState, Profile, RuntimeKind, SessionId, SessionState,
    WORKSPACE_MOUNT,
};
use bay_driver::{
    ContainerSpec, ContainerStatus, Driver, VolumeMount, VolumeSpec, LABEL_INSTANCE,
    LABEL_MANAGED, LABEL_OWNER, LABEL_ROLE, LABEL_SANDBOX, LABEL_SESSION,
};
use bay_store::{
    CargoRecord, ContainerRecord, ContainerState, SandboxRecord, SessionRecord, StateStore,
};
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;

/// Owns session records and performs lazy startup, health probing,
/// multi-container orchestration and restart on crash.
///
/// `ensure_running` is the idempotent convergence operation; callers hold
/// the sandbox's lock, so only one caller converges at a time and the rest
/// observe the converged result.
pub struct SessionManager {
    store: Arc<dyn StateStore>,
    driver: Arc<dyn Driver>,
    pool: Arc<AdapterPool>,
    catalog: Arc<ProfileCatalog>,
    runtime: RuntimeSettings,
    instance: String,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        driver: Arc<dyn Driver>,
        pool: Arc<AdapterPool>,
        catalog: Arc<ProfileCatalog>,
        runtime: RuntimeSettings,
        instance: String,
    ) -> Self {
        Self { store, driver, pool, catalog, runtime, instance }
    }

    pub fn pool(&self) -> &Arc<AdapterPool> {
        &self.pool
    }

    /// Converge the sandbox's session to observed-state running with a valid
    /// endpoint and a passed readiness probe, from any starting state.
    ///
    /// Within one call: the backend is probed at most once and one
    /// kill-and-recreate recovery is attempted; a second consecutive failure
    /// surfaces as a retryable error instead of looping.
    pub async fn ensure_running(
        &self,
        sandbox: &SandboxRecord,
        cargo: &CargoRecord,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, OrchestratorError> {
        let profile = self.profile(sandbox)?;

        // 1. Resolve the current session, or synthesize a fresh one when the
        // previous one is gone, stopping, or terminally failed.
        let mut session = match self.store.get_live_session(&sandbox.id).await? {
            Some(s) if s.desired_state == DesiredState::Running => s,
            Some(stale) => {
                self.teardown(stale).await?;
                self.fresh_session(sandbox, &profile, now).await?
            }
            None => self.fresh_session(sandbox, &profile, now).await?,
        };

        // 2. Active probe: a session that claims to run must have a backend
        // container that agrees. An externally-killed container is healed
        // here, invisibly to the caller.
        if matches!(session.observed_state, SessionState::Running | SessionState::Degraded) {
            let primary_id = session.primary().and_then(|c| c.container_id.clone());
            match primary_id {
                Some(cid) => match self.driver.status(&cid).await {
                    Ok(ContainerStatus::Running) => {
                        session = self.refresh_sidecars(session).await?;
                    }
                    Ok(_) => {
                        info!(session_id = %session.id, container_id = %cid,
                            "primary container gone, recreating");
                        session = self.reset_to_pending(session).await?;
                    }
                    Err(e) if e.retryable() => {
                        return Err(OrchestratorError::not_ready(format!(
                            "backend probe failed: {e}"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                },
                // Running without a container id is a corrupt leftover;
                // rebuild from scratch.
                None => session = self.reset_to_pending(session).await?,
            }
        }

        // 3. Cold start: create the container group.
        if session.observed_state == SessionState::Pending {
            if let Err(e) = self.create_group(sandbox, cargo, &profile, &mut session).await {
                self.mark_failed(&mut session, &e).await;
                return Err(e);
            }
            session.observed_state = SessionState::Starting;
            session = self.store.update_session(&session).await?;
        }

        // 4. Readiness: poll the primary's meta until the deadline.
        if session.observed_state == SessionState::Starting {
            session = self.await_ready(session, &profile).await?;
        }

        // 5. Running: adapters are rebuilt lazily by the pool after process
        // restart; nothing to do here.
        Ok(session)
    }

    /// Stop the session's compute. The cargo is untouched; a subsequent
    /// ensure-running builds a fresh container group over the same volume.
    pub async fn stop(&self, sandbox: &SandboxRecord) -> Result<(), OrchestratorError> {
        let Some(mut session) = self.store.get_live_session(&sandbox.id).await? else {
            return Ok(());
        };
        session.desired_state = DesiredState::Stopped;
        session.observed_state = SessionState::Stopping;
        let mut session = self.store.update_session(&session).await?;

        self.destroy_containers(&mut session).await;
        if let Some(network) = session.network_id.take() {
            if let Err(e) = self.driver.destroy_network(&network).await {
                warn!(session_id = %session.id, error = %e, "network teardown failed");
            }
        }

        session.observed_state = SessionState::Stopped;
        session.endpoint = None;
        session.ready_at = None;
        self.store.update_session(&session).await?;
        info!(session_id = %session.id, sandbox_id = %sandbox.id, "session stopped");
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn profile(&self, sandbox: &SandboxRecord) -> Result<Profile, OrchestratorError> {
        self.catalog
            .get(&sandbox.profile_id)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::Internal(format!(
                    "profile '{}' missing from catalog",
                    sandbox.profile_id
                ))
            })
    }

    async fn fresh_session(
        &self,
        sandbox: &SandboxRecord,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, OrchestratorError> {
        let containers: Vec<ContainerRecord> = profile
            .start_order()?
            .into_iter()
            .map(|b| ContainerRecord {
                name: b.name.clone(),
                role: b.role,
                image: b.image.clone(),
                runtime_kind: b.runtime_kind,
                container_id: None,
                endpoint: None,
                capabilities: b.capabilities.clone(),
                observed_state: ContainerState::Pending,
            })
            .collect();

        let record = SessionRecord {
            id: SessionId::generate(),
            sandbox_id: sandbox.id.clone(),
            desired_state: DesiredState::Running,
            observed_state: SessionState::Pending,
            containers,
            primary_container: profile.primary().name.clone(),
            endpoint: None,
            network_id: None,
            last_activity: now,
            idle_timeout_secs: profile.idle_timeout_secs,
            ready_at: None,
            failed_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.store.insert_session(&record).await?;
        debug!(session_id = %record.id, sandbox_id = %sandbox.id, "session synthesized");
        Ok(record)
    }

    /// Best-effort teardown of a stale session so a replacement can be
    /// inserted without tripping the one-live-session constraint.
    async fn teardown(&self, mut session: SessionRecord) -> Result<(), OrchestratorError> {
        self.destroy_containers(&mut session).await;
        if let Some(network) = session.network_id.take() {
            let _ = self.driver.destroy_network(&network).await;
        }
        session.observed_state = SessionState::Stopped;
        session.endpoint = None;
        self.store.update_session(&session).await?;
        Ok(())
    }

    async fn reset_to_pending(
        &self,
        mut session: SessionRecord,
    ) -> Result<SessionRecord, OrchestratorError> {
        self.destroy_containers(&mut session).await;
        session.observed_state = SessionState::Pending;
        session.endpoint = None;
        session.ready_at = None;
        Ok(self.store.update_session(&session).await?)
    }

    /// Destroy every container of the session (missing ones are fine),
    /// invalidate their adapters and clear recorded ids/endpoints.
    async fn destroy_containers(&self, session: &mut SessionRecord) {
        for container in &mut session.containers {
            if let Some(cid) = container.container_id.take() {
                if let Err(e) = self.driver.stop_container(&cid).await {
                    debug!(container_id = %cid, error = %e, "stop during teardown failed");
                }
                if let Err(e) = self.driver.destroy_container(&cid).await {
                    warn!(container_id = %cid, error = %e, "destroy during teardown failed");
                }
                self.pool.invalidate_container(&cid);
            }
            container.endpoint = None;
            container.observed_state = ContainerState::Pending;
        }
    }

    /// Create volume, network (multi-container only) and the container
    /// group; start containers in dependency order and record endpoints.
    /// On any failure everything created here is destroyed before the error
    /// propagates, so a failed session leaves no backend residue.
    async fn create_group(
        &self,
        sandbox: &SandboxRecord,
        cargo: &CargoRecord,
        profile: &Profile,
        session: &mut SessionRecord,
    ) -> Result<(), OrchestratorError> {
        // Idempotent: heals a volume deleted underneath an existing cargo.
        self.driver
            .create_volume(&VolumeSpec {
                name: cargo.backend_handle.clone(),
                labels: self.labels(sandbox, session, "cargo"),
            })
            .await?;

        let order = profile.start_order()?;
        let network = if order.len() > 1 {
            Some(self.driver.create_network(session.id.as_str()).await?)
        } else {
            None
        };
        session.network_id = network.clone();

        let specs: Vec<ContainerSpec> = order
            .iter()
            .map(|b| self.container_spec(b, sandbox, cargo, session, network.as_deref()))
            .collect();

        let outcome = self.create_and_start(&order, specs, session).await;
        if let Err(e) = outcome {
            self.destroy_containers(session).await;
            if let Some(network) = session.network_id.take() {
                let _ = self.driver.destroy_network(&network).await;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn create_and_start(
        &self,
        order: &[&ContainerBlueprint],
        specs: Vec<ContainerSpec>,
        session: &mut SessionRecord,
    ) -> Result<(), OrchestratorError> {
        let ids = self.driver.create_multi(&specs).await?;
        for (blueprint, cid) in order.iter().zip(&ids) {
            if let Some(record) = session.container_mut(&blueprint.name) {
                record.container_id = Some(cid.clone());
            }
        }

        for blueprint in order {
            let cid = session
                .container(&blueprint.name)
                .and_then(|c| c.container_id.clone())
                .ok_or_else(|| {
                    OrchestratorError::Internal(format!(
                        "container '{}' lost its id during creation",
                        blueprint.name
                    ))
                })?;
            let endpoint = self.driver.start_container(&cid).await?;
            let is_primary = blueprint.name == session.primary_container;
            if let Some(record) = session.container_mut(&blueprint.name) {
                record.endpoint = Some(endpoint.clone());
                record.observed_state = ContainerState::Running;
            }
            if is_primary {
                session.endpoint = Some(endpoint);
            }
        }
        Ok(())
    }

    /// Poll the primary adapter's meta with exponential backoff until the
    /// readiness deadline. First success validates meta against the profile
    /// (fatal on mismatch), checks sidecar liveness, and promotes the
    /// session to running (or degraded).
    async fn await_ready(
        &self,
        mut session: SessionRecord,
        profile: &Profile,
    ) -> Result<SessionRecord, OrchestratorError> {
        let primary_bp = profile.primary();
        let (cid, endpoint) = match session.primary() {
            Some(c) => match (&c.container_id, &c.endpoint) {
                (Some(cid), Some(ep)) => (cid.clone(), ep.clone()),
                _ => {
                    return Err(OrchestratorError::Internal(
                        "starting session has no primary endpoint".into(),
                    ));
                }
            },
            None => {
                return Err(OrchestratorError::Internal(
                    "session is missing its primary container".into(),
                ));
            }
        };

        let deadline = Instant::now() + Duration::from_secs(self.runtime.readiness_deadline_secs);
        let mut backoff = Duration::from_millis(self.runtime.readiness_initial_backoff_ms.max(1));
        const BACKOFF_CEILING: Duration = Duration::from_secs(5);

        loop {
            let probe_timeout = BACKOFF_CEILING.min(deadline.saturating_duration_since(
                Instant::now(),
            ))
            .max(Duration::from_millis(100));

            let probed: Result<RuntimeMeta, AdapterError> = match primary_bp.runtime_kind {
                RuntimeKind::Ship => {
                    self.pool.ship(&cid, &endpoint).meta(probe_timeout).await
                }
                RuntimeKind::Browser => {
                    self.pool.browser(&cid, &endpoint).meta(probe_timeout).await
                }
            };

            match probed {
                Ok(meta) => {
                    if let Err(e) =
                        validate_meta(&meta, WORKSPACE_MOUNT, &primary_bp.capabilities)
                    {
                        let err = OrchestratorError::Internal(e.to_string());
                        self.mark_failed(&mut session, &err).await;
                        return Err(err);
                    }
                    return Ok(self.promote_ready(session).await?);
                }
                Err(e) if e.is_connection() || matches!(e, AdapterError::Runtime { .. }) => {
                    if Instant::now() + backoff >= deadline {
                        // The session stays in starting with its last known
                        // endpoint; the next call resumes polling.
                        debug!(session_id = %session.id, error = %e,
                            "readiness deadline reached");
                        return Err(OrchestratorError::SessionNotReady {
                            message: "session is still starting".into(),
                            retry_after_ms: 3_000,
                        });
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CEILING);
                }
                Err(e) => {
                    let err = OrchestratorError::Internal(e.to_string());
                    self.mark_failed(&mut session, &err).await;
                    return Err(err);
                }
            }
        }
    }

    /// First meta probe passed: settle per-container states and promote.
    async fn promote_ready(
        &self,
        mut session: SessionRecord,
    ) -> Result<SessionRecord, OrchestratorError> {
        let mut degraded = false;
        let sidecars: Vec<(String, Option<String>)> = session
            .containers
            .iter()
            .filter(|c| c.name != session.primary_container)
            .map(|c| (c.name.clone(), c.container_id.clone()))
            .collect();
        for (name, cid) in sidecars {
            let state = match cid {
                Some(cid) => match self.driver.status(&cid).await {
                    Ok(ContainerStatus::Running) => ContainerState::Running,
                    _ => ContainerState::Failed,
                },
                None => ContainerState::Failed,
            };
            if state == ContainerState::Failed {
                degraded = true;
            }
            if let Some(record) = session.container_mut(&name) {
                record.observed_state = state;
            }
        }
        let primary_name = session.primary_container.clone();
        if let Some(primary) = session.container_mut(&primary_name) {
            primary.observed_state = ContainerState::Running;
        }

        let now = Utc::now();
        session.observed_state =
            if degraded { SessionState::Degraded } else { SessionState::Running };
        session.ready_at = Some(now);
        session.last_activity = now;
        let session = self.store.update_session(&session).await?;
        info!(session_id = %session.id, state = %session.observed_state, "session ready");
        Ok(session)
    }

    /// Replace one failed non-primary container of a degraded session in
    /// place. Called from the router when a request routes to the dead
    /// container; degraded sessions are never repaired in the background.
    /// A container created but not successfully started is destroyed
    /// before the error propagates.
    pub async fn recover_container(
        &self,
        sandbox: &SandboxRecord,
        cargo: &CargoRecord,
        name: &str,
    ) -> Result<SessionRecord, OrchestratorError> {
        let Some(mut session) = self.store.get_live_session(&sandbox.id).await? else {
            return Err(OrchestratorError::not_ready("session is gone; retry"));
        };
        if name == session.primary_container {
            // Primary failures go through the ensure-running probe path.
            return Err(OrchestratorError::not_ready("primary container is recovering"));
        }
        let profile = self.profile(sandbox)?;
        let blueprint = profile
            .container(name)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::Internal(format!("unknown container '{name}'"))
            })?;

        // Tear down whatever is left of the old container.
        if let Some(record) = session.container_mut(name) {
            if let Some(cid) = record.container_id.take() {
                let _ = self.driver.stop_container(&cid).await;
                if let Err(e) = self.driver.destroy_container(&cid).await {
                    warn!(container_id = %cid, error = %e, "destroy of failed container");
                }
                self.pool.invalidate_container(&cid);
            }
            record.endpoint = None;
            record.observed_state = ContainerState::Pending;
        }

        let network = session.network_id.clone();
        let spec = self.container_spec(&blueprint, sandbox, cargo, &session, network.as_deref());
        let cid = self.driver.create_container(&spec).await?;
        let endpoint = match self.driver.start_container(&cid).await {
            Ok(ep) => ep,
            Err(e) => {
                let _ = self.driver.destroy_container(&cid).await;
                if let Some(record) = session.container_mut(name) {
                    record.observed_state = ContainerState::Failed;
                }
                let _ = self.store.update_session(&session).await;
                return Err(e.into());
            }
        };
        if let Some(record) = session.container_mut(name) {
            record.container_id = Some(cid);
            record.endpoint = Some(endpoint);
            record.observed_state = ContainerState::Running;
        }

        let still_degraded = session.containers.iter().any(|c| {
            c.name != session.primary_container
                && c.observed_state == ContainerState::Failed
        });
        session.observed_state =
            if still_degraded { SessionState::Degraded } else { SessionState::Running };
        let session = self.store.update_session(&session).await?;
        info!(session_id = %session.id, container = %name, "failed container replaced");
        Ok(session)
    }

    /// Re-check non-primary containers while the primary is healthy.
    /// A dead sidecar degrades the session; a recovered one restores it.
    async fn refresh_sidecars(
        &self,
        mut session: SessionRecord,
    ) -> Result<SessionRecord, OrchestratorError> {
        let sidecars: Vec<(String, Option<String>)> = session
            .containers
            .iter()
            .filter(|c| c.name != session.primary_container)
            .map(|c| (c.name.clone(), c.container_id.clone()))
            .collect();
        if sidecars.is_empty() {
            return Ok(session);
        }

        let mut changed = false;
        for (name, cid) in sidecars {
            let observed = match cid {
                Some(cid) => match self.driver.status(&cid).await {
                    Ok(ContainerStatus::Running) => ContainerState::Running,
                    Ok(_) => ContainerState::Failed,
                    Err(_) => continue, // probe hiccup: keep the recorded state
                },
                None => ContainerState::Failed,
            };
            if let Some(record) = session.container_mut(&name) {
                if record.observed_state != observed {
                    record.observed_state = observed;
                    changed = true;
                }
            }
        }

        let degraded = session
            .containers
            .iter()
            .any(|c| {
                c.name != session.primary_container
                    && c.observed_state == ContainerState::Failed
            });
        let target = if degraded { SessionState::Degraded } else { SessionState::Running };
        if session.observed_state != target {
            session.observed_state = target;
            changed = true;
        }
        if changed {
            session = self.store.update_session(&session).await?;
        }
        Ok(session)
    }

    async fn mark_failed(&self, session: &mut SessionRecord, error: &OrchestratorError) {
        session.observed_state = SessionState::Failed;
        session.failed_reason = Some(error.to_string());
        session.endpoint = None;
        session.ready_at = None;
        if let Err(e) = self.store.update_session(session).await {
            warn!(session_id = %session.id, error = %e, "failed to persist failed session");
        }
        warn!(session_id = %session.id, reason = %error, "session failed");
    }

    fn container_spec(
        &self,
        blueprint: &ContainerBlueprint,
        sandbox: &SandboxRecord,
        cargo: &CargoRecord,
        session: &SessionRecord,
        network: Option<&str>,
    ) -> ContainerSpec {
        let suffix: String =
            session.id.as_str().trim_start_matches("ses-").chars().take(8).collect();
        ContainerSpec {
            name: format!("bay-{suffix}-{}", blueprint.name),
            image: blueprint.image.clone(),
            env: blueprint.env.clone(),
            runtime_port: blueprint.runtime_port,
            memory_bytes: blueprint.memory_bytes,
            cpu_quota: blueprint.cpu_quota,
            volumes: vec![VolumeMount {
                handle: cargo.backend_handle.clone(),
                mount_path: cargo.mount_path.clone(),
            }],
            network: network.map(String::from),
            labels: self.labels(sandbox, session, &blueprint.role.to_string()),
        }
    }

    fn labels(
        &self,
        sandbox: &SandboxRecord,
        session: &SessionRecord,
        role: &str,
    ) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_INSTANCE.to_string(), self.instance.clone());
        labels.insert(LABEL_OWNER.to_string(), sandbox.owner.to_string());
        labels.insert(LABEL_SANDBOX.to_string(), sandbox.id.to_string());
        labels.insert(LABEL_SESSION.to_string(), session.id.to_string());
        labels.insert(LABEL_ROLE.to_string(), role.to_string());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bay_domain::{CargoKind, Owner, ProfileId, SandboxId};
    use bay_driver::StubDriver;
    use bay_store::InMemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn runtime_settings(deadline_secs: u64) -> RuntimeSettings {
        RuntimeSettings {
            readiness_deadline_secs: deadline_secs,
            readiness_initial_backoff_ms: 20,
            call_timeout_secs: 5,
            max_call_timeout_secs: 30,
        }
    }

    async fn ready_runtime() -> MockServer {
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

    struct Fixture {
        manager: SessionManager,
        store: Arc<InMemoryStore>,
        driver: Arc<StubDriver>,
        sandbox: SandboxRecord,
        cargo: CargoRecord,
    }

    fn fixture(profile: &str, deadline_secs: u64) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(StubDriver::new());
        let catalog = Arc::new(ProfileCatalog::builtin(300));
        let manager = SessionManager::new(
            store.clone(),
            driver.clone(),
            Arc::new(AdapterPool::new()),
            catalog,
            runtime_settings(deadline_secs),
            "inst-test".into(),
        );

        let now = Utc::now();
        let sandbox = SandboxRecord {
            id: SandboxId::new("sbx-1"),
            owner: Owner::new("alice"),
            profile_id: ProfileId::new(profile),
            cargo_id: bay_domain::CargoId::new("crg-1"),
            current_session_id: None,
            desired_state: DesiredState::Running,
            expires_at: None,
            idle_expires_at: None,
            last_activity: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 0,
        };
        let cargo = CargoRecord {
            id: bay_domain::CargoId::new("crg-1"),
            owner: Owner::new("alice"),
            backend_handle: "bay-crg-1".into(),
            kind: CargoKind::Managed,
            mount_path: WORKSPACE_MOUNT.into(),
            managed_by: Some(sandbox.id.clone()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        Fixture { manager, store, driver, sandbox, cargo }
    }

    #[tokio::test]
    async fn cold_start_converges_to_running() {
        let runtime = ready_runtime().await;
        let f = fixture("python-default", 5);
        f.driver.set_endpoint(runtime.uri());

        let session =
            f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        assert_eq!(session.observed_state, SessionState::Running);
        assert!(session.ready_at.is_some());
        assert_eq!(session.endpoint.as_deref(), Some(runtime.uri().as_str()));
        assert_eq!(f.driver.container_count(), 1);
        // Single-container groups get no session network.
        assert_eq!(f.driver.network_count(), 0);
    }

    #[tokio::test]
    async fn ensure_running_is_idempotent() {
        let runtime = ready_runtime().await;
        let f = fixture("python-default", 5);
        f.driver.set_endpoint(runtime.uri());

        let first = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        let second = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(f.driver.container_count(), 1);
    }

    #[tokio::test]
    async fn externally_killed_container_heals_on_next_call() {
        let runtime = ready_runtime().await;
        let f = fixture("python-default", 5);
        f.driver.set_endpoint(runtime.uri());

        let first = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        let original = first.primary().unwrap().container_id.clone().unwrap();
        assert!(f.driver.kill(&original));

        let healed = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        assert_eq!(healed.observed_state, SessionState::Running);
        let replacement = healed.primary().unwrap().container_id.clone().unwrap();
        assert_ne!(original, replacement);
        // Same session row healed in place.
        assert_eq!(first.id, healed.id);
        assert_eq!(f.driver.container_count(), 1);
    }

    #[tokio::test]
    async fn multi_container_failure_rolls_back_everything() {
        let runtime = ready_runtime().await;
        let f = fixture("python-browser", 5);
        f.driver.set_endpoint(runtime.uri());
        f.driver.fail_start_of("browser");

        let err = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Internal(_)));
        assert_eq!(f.driver.container_count(), 0, "rollback must destroy all containers");
        assert_eq!(f.driver.network_count(), 0, "rollback must destroy the network");

        let live = f.store.get_live_session(&f.sandbox.id).await.unwrap();
        assert!(live.is_none(), "failed session must not be live");

        // A fresh ensure-running attempts a brand new session and succeeds.
        let session = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        assert_eq!(session.observed_state, SessionState::Running);
        assert_eq!(f.driver.container_count(), 2);
        assert_eq!(f.driver.network_count(), 1);
    }

    #[tokio::test]
    async fn readiness_deadline_leaves_session_starting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": "warming up"
            })))
            .mount(&server)
            .await;

        let f = fixture("python-default", 1);
        f.driver.set_endpoint(server.uri());

        let err = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap_err();
        match err {
            OrchestratorError::SessionNotReady { retry_after_ms, .. } => {
                assert!(retry_after_ms > 0);
            }
            other => panic!("expected SessionNotReady, got {other:?}"),
        }

        let session = f.store.get_live_session(&f.sandbox.id).await.unwrap().unwrap();
        assert_eq!(session.observed_state, SessionState::Starting);
        assert!(session.endpoint.is_some(), "last known endpoint is kept");
    }

    #[tokio::test]
    async fn invalid_meta_is_fatal_for_the_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "mount_path": "/somewhere-else",
                "capabilities": ["python", "shell", "filesystem"],
                "runtime_kind": "ship",
                "api_version": "1.0",
            })))
            .mount(&server)
            .await;

        let f = fixture("python-default", 5);
        f.driver.set_endpoint(server.uri());

        let err = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Internal(_)));
        assert!(f.store.get_live_session(&f.sandbox.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_destroys_compute_but_not_the_volume() {
        let runtime = ready_runtime().await;
        let f = fixture("python-default", 5);
        f.driver.set_endpoint(runtime.uri());
        f.driver
            .create_volume(&VolumeSpec { name: "bay-crg-1".into(), labels: HashMap::new() })
            .await
            .unwrap();

        let first = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        f.manager.stop(&f.sandbox).await.unwrap();
        assert_eq!(f.driver.container_count(), 0);
        assert!(f.driver.has_volume("bay-crg-1"), "cargo volume must survive stop");

        // Stop is idempotent.
        f.manager.stop(&f.sandbox).await.unwrap();

        // A fresh session (new kernel state) comes up over the same volume.
        let second = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.observed_state, SessionState::Running);
    }

    #[tokio::test]
    async fn dead_sidecar_degrades_the_session() {
        let runtime = ready_runtime().await;
        let f = fixture("python-browser", 5);
        f.driver.set_endpoint(runtime.uri());

        let session = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        assert_eq!(session.observed_state, SessionState::Running);
        let sidecar_id = session
            .container("browser")
            .and_then(|c| c.container_id.clone())
            .unwrap();
        f.driver.kill(&sidecar_id);

        let session = f.manager.ensure_running(&f.sandbox, &f.cargo, Utc::now()).await.unwrap();
        assert_eq!(session.observed_state, SessionState::Degraded);
        assert_eq!(
            session.container("browser").unwrap().observed_state,
            ContainerState::Failed
        );
        // The primary keeps serving.
        assert_eq!(
            session.container("ship").unwrap().observed_state,
            ContainerState::Running
        );
    }
}

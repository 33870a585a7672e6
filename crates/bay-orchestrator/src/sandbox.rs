use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use bay_config::ProfileCatalog;
use bay_domain::{
    sandbox_status, CargoId, CargoKind, DesiredState, Owner, ProfileId, SandboxId, SandboxStatus,
};
use bay_store::{SandboxRecord, SessionRecord, StateStore};
use tracing::{info, warn};

use crate::cargo::CargoManager;
use crate::error::OrchestratorError;
use crate::locks::SandboxLocks;
use crate::session::SessionManager;

#[derive(Debug, Clone)]
pub struct CreateSandboxParams {
    pub profile_id: ProfileId,
    /// `None` means the sandbox never expires. `Some(0)` creates it already
    /// expired; creation itself never fails on TTL grounds.
    pub ttl_seconds: Option<u64>,
    /// Attach an existing external cargo instead of creating a managed one.
    pub cargo_id: Option<CargoId>,
}

/// Owns sandbox records: creation, lookup, TTL, stop/delete semantics and
/// the per-sandbox locking that serializes every mutating operation.
pub struct SandboxManager {
    store: Arc<dyn StateStore>,
    locks: Arc<SandboxLocks>,
    sessions: Arc<SessionManager>,
    cargos: Arc<CargoManager>,
    catalog: Arc<ProfileCatalog>,
    max_sandboxes_per_owner: Option<usize>,
}

impl SandboxManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        locks: Arc<SandboxLocks>,
        sessions: Arc<SessionManager>,
        cargos: Arc<CargoManager>,
        catalog: Arc<ProfileCatalog>,
        max_sandboxes_per_owner: Option<usize>,
    ) -> Self {
        Self { store, locks, sessions, cargos, catalog, max_sandboxes_per_owner }
    }

    pub fn locks(&self) -> &Arc<SandboxLocks> {
        &self.locks
    }

    // ── Creation & lookup ─────────────────────────────────────────────────────

    pub async fn create(
        &self,
        owner: &Owner,
        params: CreateSandboxParams,
        now: DateTime<Utc>,
    ) -> Result<(SandboxRecord, SandboxStatus), OrchestratorError> {
        if self.catalog.get(&params.profile_id).is_none() {
            return Err(OrchestratorError::Validation(format!(
                "unknown profile '{}'",
                params.profile_id
            )));
        }
        if let Some(max) = self.max_sandboxes_per_owner {
            let current = self.store.list_sandboxes(owner).await?.len();
            if current >= max {
                return Err(OrchestratorError::QuotaExceeded(format!(
                    "owner already has {current} sandboxes (limit {max})"
                )));
            }
        }

        let id = SandboxId::generate();
        let (cargo_id, created_cargo) = match params.cargo_id {
            Some(cargo_id) => {
                let cargo = self.cargos.get(owner, &cargo_id).await?;
                if cargo.kind != CargoKind::External {
                    return Err(OrchestratorError::Conflict(
                        "managed cargo belongs to its sandbox and cannot be attached".into(),
                    ));
                }
                (cargo.id, false)
            }
            None => {
                let cargo = self.cargos.create_managed(owner, &id, now).await?;
                (cargo.id, true)
            }
        };

        let record = SandboxRecord {
            id: id.clone(),
            owner: owner.clone(),
            profile_id: params.profile_id,
            cargo_id: cargo_id.clone(),
            current_session_id: None,
            desired_state: DesiredState::Running,
            expires_at: params.ttl_seconds.map(|t| now + Duration::seconds(t as i64)),
            idle_expires_at: None,
            last_activity: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 0,
        };
        if let Err(e) = self.store.insert_sandbox(&record).await {
            if created_cargo {
                if let Err(ce) = self.cargos.delete_managed_cascade(&cargo_id, now).await {
                    warn!(cargo_id = %cargo_id, error = %ce, "cargo rollback failed");
                }
            }
            return Err(e.into());
        }
        info!(sandbox_id = %id, owner = %owner, "sandbox created");

        let status = sandbox_status(None, record.expires_at, None, now);
        Ok((record, status))
    }

    pub async fn get(
        &self,
        owner: &Owner,
        id: &SandboxId,
        now: DateTime<Utc>,
    ) -> Result<(SandboxRecord, SandboxStatus), OrchestratorError> {
        let record = self.authorized(owner, id).await?;
        let status = self.status_of(&record, now).await?;
        Ok((record, status))
    }

    pub async fn list(
        &self,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> Result<Vec<(SandboxRecord, SandboxStatus)>, OrchestratorError> {
        let mut out = Vec::new();
        for record in self.store.list_sandboxes(owner).await? {
            let status = self.status_of(&record, now).await?;
            out.push((record, status));
        }
        Ok(out)
    }

    async fn status_of(
        &self,
        record: &SandboxRecord,
        now: DateTime<Utc>,
    ) -> Result<SandboxStatus, OrchestratorError> {
        let session = self.store.get_live_session(&record.id).await?;
        Ok(sandbox_status(
            record.deleted_at,
            record.expires_at,
            session.map(|s| (s.observed_state, s.ready_at)),
            now,
        ))
    }

    // ── Converge ──────────────────────────────────────────────────────────────

    /// Acquire the sandbox lock and converge its session to running.
    /// Concurrent callers serialize here and all observe the same ready
    /// session; exactly one performs the container-creation sequence.
    ///
    /// The converge runs in a spawned task holding an owned lock guard, so
    /// a client that hangs up mid-start does not abort the container
    /// creation: the next request finds the session ready (or converging)
    /// rather than half-built.
    pub async fn ensure_running(
        &self,
        owner: &Owner,
        id: &SandboxId,
        now: DateTime<Utc>,
    ) -> Result<(SandboxRecord, SessionRecord), OrchestratorError> {
        let guard = self.locks.lock_for(id).lock_owned().await;

        let store = self.store.clone();
        let sessions = self.sessions.clone();
        let owner = owner.clone();
        let id = id.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;

            // Re-read inside the lock: a delete or stop may have won the race.
            let mut sandbox = match store.get_sandbox(&id).await? {
                Some(s) if s.owner == owner && !s.is_deleted() => s,
                _ => return Err(OrchestratorError::NotFound(format!("sandbox '{id}'"))),
            };
            if sandbox.is_expired(now) {
                return Err(OrchestratorError::SandboxExpired);
            }
            // A capability call against a stopped sandbox restarts it.
            if sandbox.desired_state == DesiredState::Stopped {
                sandbox.desired_state = DesiredState::Running;
            }

            let cargo = store
                .get_cargo(&sandbox.cargo_id)
                .await?
                .ok_or_else(|| {
                    OrchestratorError::Internal(format!(
                        "cargo '{}' missing for sandbox '{id}'",
                        sandbox.cargo_id
                    ))
                })?;

            let session = match sessions.ensure_running(&sandbox, &cargo, now).await {
                Ok(session) => session,
                Err(e) => {
                    // No live session means no running compute; keep the
                    // current-session pointer honest before surfacing the error.
                    if sandbox.current_session_id.is_some()
                        && store.get_live_session(&id).await?.is_none()
                    {
                        sandbox.current_session_id = None;
                        store.update_sandbox(&sandbox).await?;
                    }
                    return Err(e);
                }
            };

            if sandbox.current_session_id.as_ref() != Some(&session.id)
                || sandbox.desired_state != DesiredState::Running
            {
                sandbox.current_session_id = Some(session.id.clone());
                sandbox.desired_state = DesiredState::Running;
                sandbox = store.update_sandbox(&sandbox).await?;
            }
            Ok((sandbox, session))
        });

        task.await
            .map_err(|e| OrchestratorError::Internal(format!("converge task failed: {e}")))?
    }

    /// Replace a single failed non-primary container under the sandbox
    /// lock. Used by the router when a request needs a capability whose
    /// container died while the primary kept serving.
    pub async fn recover_container(
        &self,
        owner: &Owner,
        id: &SandboxId,
        container: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, OrchestratorError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let sandbox = self.authorized(owner, id).await?;
        if sandbox.is_expired(now) {
            return Err(OrchestratorError::SandboxExpired);
        }
        let cargo = self
            .store
            .get_cargo(&sandbox.cargo_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Internal(format!(
                    "cargo '{}' missing for sandbox '{id}'",
                    sandbox.cargo_id
                ))
            })?;
        self.sessions.recover_container(&sandbox, &cargo, container).await
    }

    /// Record activity after a successful capability call: the sandbox's
    /// last-activity strictly moves forward and the idle deadline resets.
    pub async fn touch(
        &self,
        id: &SandboxId,
        session_id: &bay_domain::SessionId,
    ) -> Result<(), OrchestratorError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;
        let now = Utc::now();

        if let Some(mut sandbox) = self.store.get_sandbox(id).await? {
            if sandbox.is_deleted() {
                return Ok(());
            }
            if let Some(mut session) = self.store.get_session(session_id).await? {
                if session.is_live() {
                    session.last_activity = now;
                    self.store.update_session(&session).await?;
                    sandbox.idle_expires_at = Some(session.idle_deadline());
                }
            }
            sandbox.last_activity = now;
            self.store.update_sandbox(&sandbox).await?;
        }
        Ok(())
    }

    // ── TTL & lifecycle ───────────────────────────────────────────────────────

    /// Refresh the idle deadline only; the absolute TTL is untouched.
    pub async fn keepalive(
        &self,
        owner: &Owner,
        id: &SandboxId,
        now: DateTime<Utc>,
    ) -> Result<(SandboxRecord, SandboxStatus), OrchestratorError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut sandbox = self.authorized(owner, id).await?;
        if sandbox.is_expired(now) {
            return Err(OrchestratorError::SandboxExpired);
        }

        if let Some(mut session) = self.store.get_live_session(id).await? {
            session.last_activity = now;
            let session = self.store.update_session(&session).await?;
            sandbox.idle_expires_at = Some(session.idle_deadline());
        }
        sandbox.last_activity = now;
        let sandbox = self.store.update_sandbox(&sandbox).await?;
        let status = self.status_of(&sandbox, now).await?;
        Ok((sandbox, status))
    }

    /// `expires_at = max(old, now) + delta`. Conflicts on expired or
    /// infinite-TTL sandboxes.
    pub async fn extend_ttl(
        &self,
        owner: &Owner,
        id: &SandboxId,
        delta_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<(SandboxRecord, SandboxStatus), OrchestratorError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut sandbox = self.authorized(owner, id).await?;
        if sandbox.is_expired(now) {
            return Err(OrchestratorError::SandboxExpired);
        }
        let Some(old) = sandbox.expires_at else {
            return Err(OrchestratorError::SandboxTtlInfinite);
        };
        sandbox.expires_at = Some(old.max(now) + Duration::seconds(delta_seconds as i64));
        let sandbox = self.store.update_sandbox(&sandbox).await?;
        let status = self.status_of(&sandbox, now).await?;
        Ok((sandbox, status))
    }

    /// Stop compute; the sandbox (and its cargo) stay. Idempotent.
    pub async fn stop(
        &self,
        owner: &Owner,
        id: &SandboxId,
        now: DateTime<Utc>,
    ) -> Result<(SandboxRecord, SandboxStatus), OrchestratorError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let mut sandbox = self.authorized(owner, id).await?;
        self.sessions.stop(&sandbox).await?;
        sandbox.desired_state = DesiredState::Stopped;
        sandbox.current_session_id = None;
        let sandbox = self.store.update_sandbox(&sandbox).await?;
        let status = self.status_of(&sandbox, now).await?;
        info!(sandbox_id = %id, "sandbox stopped");
        Ok((sandbox, status))
    }

    /// Soft delete with cascade: stop compute, delete the managed cargo,
    /// mark deleted. Idempotent; the lock entry is dropped at the end.
    pub async fn delete(
        &self,
        owner: &Owner,
        id: &SandboxId,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        {
            let lock = self.locks.lock_for(id);
            let _guard = lock.lock().await;

            let mut sandbox = match self.store.get_sandbox(id).await? {
                Some(s) if &s.owner == owner => s,
                _ => return Err(OrchestratorError::NotFound(format!("sandbox '{id}'"))),
            };
            if sandbox.is_deleted() {
                return Ok(());
            }

            self.sessions.stop(&sandbox).await?;
            self.cascade_cargo(&sandbox, now).await?;

            sandbox.desired_state = DesiredState::Deleted;
            sandbox.current_session_id = None;
            sandbox.deleted_at = Some(now);
            self.store.update_sandbox(&sandbox).await?;
            info!(sandbox_id = %id, "sandbox deleted");
        }
        self.locks.remove(id);
        Ok(())
    }

    // ── GC entry points (lock-taking, re-reading) ─────────────────────────────

    /// Idle reaper: re-reads the session inside the lock so a keepalive that
    /// arrived during the scan window wins. Returns whether compute was
    /// stopped. The caller's intent (desired-state) is left untouched.
    pub async fn stop_if_idle(
        &self,
        id: &SandboxId,
        now: DateTime<Utc>,
    ) -> Result<bool, OrchestratorError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let Some(mut sandbox) = self.store.get_sandbox(id).await? else { return Ok(false) };
        if sandbox.is_deleted() {
            return Ok(false);
        }
        let Some(session) = self.store.get_live_session(id).await? else { return Ok(false) };
        if !matches!(
            session.observed_state,
            bay_domain::SessionState::Running | bay_domain::SessionState::Degraded
        ) || now <= session.idle_deadline()
        {
            return Ok(false);
        }

        self.sessions.stop(&sandbox).await?;
        sandbox.current_session_id = None;
        self.store.update_sandbox(&sandbox).await?;
        info!(sandbox_id = %id, "idle session reaped");
        Ok(true)
    }

    /// Expired reaper: re-checks expiry inside the lock (an extend-ttl that
    /// landed during the scan wins), then deletes with cascade.
    pub async fn delete_if_expired(
        &self,
        id: &SandboxId,
        now: DateTime<Utc>,
    ) -> Result<bool, OrchestratorError> {
        {
            let lock = self.locks.lock_for(id);
            let _guard = lock.lock().await;

            let Some(mut sandbox) = self.store.get_sandbox(id).await? else {
                return Ok(false);
            };
            if sandbox.is_deleted() || !sandbox.is_expired(now) {
                return Ok(false);
            }

            self.sessions.stop(&sandbox).await?;
            self.cascade_cargo(&sandbox, now).await?;
            sandbox.desired_state = DesiredState::Deleted;
            sandbox.current_session_id = None;
            sandbox.deleted_at = Some(now);
            self.store.update_sandbox(&sandbox).await?;
            info!(sandbox_id = %id, "expired sandbox reaped");
        }
        self.locks.remove(id);
        Ok(true)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn cascade_cargo(
        &self,
        sandbox: &SandboxRecord,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        let Some(cargo) = self.store.get_cargo(&sandbox.cargo_id).await? else {
            return Ok(());
        };
        if cargo.kind == CargoKind::Managed && cargo.managed_by.as_ref() == Some(&sandbox.id) {
            self.cargos.delete_managed_cascade(&cargo.id, now).await?;
        }
        Ok(())
    }

    /// Owner-scoped lookup; soft-deleted rows read as not found.
    async fn authorized(
        &self,
        owner: &Owner,
        id: &SandboxId,
    ) -> Result<SandboxRecord, OrchestratorError> {
        match self.store.get_sandbox(id).await? {
            Some(s) if &s.owner == owner && !s.is_deleted() => Ok(s),
            _ => Err(OrchestratorError::NotFound(format!("sandbox '{id}'"))),
        }
    }
}

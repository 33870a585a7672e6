use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use bay_domain::{
    CandidateId, CargoId, ExecutionId, Owner, ReleaseId, ReleaseStatus, SandboxId, SessionId,
    SkillStage,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::state::{
    CargoRecord, ExecutionFilter, ExecutionRecord, GcLease, IdempotencyRecord, SandboxRecord,
    SessionRecord, SkillCandidate, SkillRelease,
};
use crate::store::StateStore;

#[derive(Debug, Default)]
struct Inner {
    sandboxes: HashMap<SandboxId, SandboxRecord>,
    sessions: HashMap<SessionId, SessionRecord>,
    cargos: HashMap<CargoId, CargoRecord>,
    idempotency: HashMap<(Owner, String, String), IdempotencyRecord>,
    executions: Vec<ExecutionRecord>,
    candidates: HashMap<CandidateId, SkillCandidate>,
    releases: HashMap<ReleaseId, SkillRelease>,
    leases: HashMap<String, GcLease>,
}

/// In-memory implementation of [`StateStore`].
///
/// All data is lost on process exit. Suitable for tests and development mode.
/// Enforces the same uniqueness and version rules as [`crate::PostgresStore`]
/// so concurrency bugs surface in tests too.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    // ── Sandboxes ─────────────────────────────────────────────────────────────

    async fn insert_sandbox(&self, rec: &SandboxRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.sandboxes.contains_key(&rec.id) {
            return Err(StoreError::Duplicate { constraint: "sandboxes.id" });
        }
        guard.sandboxes.insert(rec.id.clone(), rec.clone());
        Ok(())
    }

    async fn get_sandbox(&self, id: &SandboxId) -> Result<Option<SandboxRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.sandboxes.get(id).cloned())
    }

    async fn list_sandboxes(&self, owner: &Owner) -> Result<Vec<SandboxRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<SandboxRecord> = guard
            .sandboxes
            .values()
            .filter(|s| &s.owner == owner && !s.is_deleted())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_all_sandboxes(&self) -> Result<Vec<SandboxRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .sandboxes
            .values()
            .filter(|s| !s.is_deleted())
            .cloned()
            .collect())
    }

    async fn update_sandbox(&self, rec: &SandboxRecord) -> Result<SandboxRecord, StoreError> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .sandboxes
            .get_mut(&rec.id)
            .ok_or_else(|| StoreError::not_found("sandbox", rec.id.as_str()))?;
        if stored.version != rec.version {
            return Err(StoreError::VersionConflict {
                entity: "sandbox",
                id: rec.id.to_string(),
            });
        }
        let mut updated = rec.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    async fn insert_session(&self, rec: &SessionRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let clash = guard
            .sessions
            .values()
            .any(|s| s.sandbox_id == rec.sandbox_id && s.is_live() && s.id != rec.id);
        if clash && rec.is_live() {
            return Err(StoreError::Duplicate { constraint: "sessions.live_per_sandbox" });
        }
        if guard.sessions.contains_key(&rec.id) {
            return Err(StoreError::Duplicate { constraint: "sessions.id" });
        }
        guard.sessions.insert(rec.id.clone(), rec.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.sessions.get(id).cloned())
    }

    async fn get_live_session(
        &self,
        sandbox_id: &SandboxId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .sessions
            .values()
            .find(|s| &s.sandbox_id == sandbox_id && s.is_live())
            .cloned())
    }

    async fn list_live_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.sessions.values().filter(|s| s.is_live()).cloned().collect())
    }

    async fn update_session(&self, rec: &SessionRecord) -> Result<SessionRecord, StoreError> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .sessions
            .get_mut(&rec.id)
            .ok_or_else(|| StoreError::not_found("session", rec.id.as_str()))?;
        if stored.version != rec.version {
            return Err(StoreError::VersionConflict {
                entity: "session",
                id: rec.id.to_string(),
            });
        }
        let mut updated = rec.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    // ── Cargos ────────────────────────────────────────────────────────────────

    async fn insert_cargo(&self, rec: &CargoRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.cargos.contains_key(&rec.id) {
            return Err(StoreError::Duplicate { constraint: "cargos.id" });
        }
        guard.cargos.insert(rec.id.clone(), rec.clone());
        Ok(())
    }

    async fn get_cargo(&self, id: &CargoId) -> Result<Option<CargoRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.cargos.get(id).cloned())
    }

    async fn list_cargos(&self, owner: &Owner) -> Result<Vec<CargoRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<CargoRecord> = guard
            .cargos
            .values()
            .filter(|c| &c.owner == owner && !c.is_deleted())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_all_cargos(&self) -> Result<Vec<CargoRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.cargos.values().filter(|c| !c.is_deleted()).cloned().collect())
    }

    async fn update_cargo(&self, rec: &CargoRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .cargos
            .get_mut(&rec.id)
            .ok_or_else(|| StoreError::not_found("cargo", rec.id.as_str()))?;
        let mut updated = rec.clone();
        updated.updated_at = Utc::now();
        *stored = updated;
        Ok(())
    }

    async fn sandboxes_referencing_cargo(
        &self,
        id: &CargoId,
    ) -> Result<Vec<SandboxId>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .sandboxes
            .values()
            .filter(|s| &s.cargo_id == id && !s.is_deleted())
            .map(|s| s.id.clone())
            .collect())
    }

    // ── Idempotency keys ──────────────────────────────────────────────────────

    async fn claim_idempotency_key(
        &self,
        rec: &IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let mut guard = self.inner.write().await;
        let k = (rec.owner.clone(), rec.scope.clone(), rec.key.clone());
        match guard.idempotency.get(&k) {
            Some(existing) if existing.expires_at > now => Ok(Some(existing.clone())),
            _ => {
                guard.idempotency.insert(k, rec.clone());
                Ok(None)
            }
        }
    }

    async fn complete_idempotency_key(
        &self,
        owner: &Owner,
        scope: &str,
        key: &str,
        status_code: u16,
        response: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let k = (owner.clone(), scope.to_string(), key.to_string());
        let rec = guard
            .idempotency
            .get_mut(&k)
            .ok_or_else(|| StoreError::not_found("idempotency_key", key))?;
        rec.status = crate::state::IdempotencyStatus::Complete;
        rec.status_code = Some(status_code);
        rec.response = Some(response);
        Ok(())
    }

    async fn release_idempotency_key(
        &self,
        owner: &Owner,
        scope: &str,
        key: &str,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .idempotency
            .remove(&(owner.clone(), scope.to_string(), key.to_string()));
        Ok(())
    }

    // ── Execution history ─────────────────────────────────────────────────────

    async fn insert_execution(&self, rec: &ExecutionRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.executions.push(rec.clone());
        Ok(())
    }

    async fn get_execution(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.executions.iter().find(|e| &e.id == id).cloned())
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<ExecutionRecord> = guard
            .executions
            .iter()
            .filter(|e| filter.owner.as_ref().map_or(true, |o| &e.owner == o))
            .filter(|e| filter.sandbox_id.as_ref().map_or(true, |s| &e.sandbox_id == s))
            .filter(|e| filter.exec_type.map_or(true, |t| e.exec_type == t))
            .filter(|e| filter.success.map_or(true, |s| e.success == s))
            .filter(|e| filter.tag.as_ref().map_or(true, |t| e.tags.contains(t)))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let start = (filter.offset as usize).min(out.len());
        let end = (start + filter.limit.max(1) as usize).min(out.len());
        Ok(out[start..end].to_vec())
    }

    async fn last_execution(
        &self,
        sandbox_id: &SandboxId,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .executions
            .iter()
            .filter(|e| &e.sandbox_id == sandbox_id)
            .max_by_key(|e| e.started_at)
            .cloned())
    }

    async fn annotate_execution(
        &self,
        id: &ExecutionId,
        description: Option<String>,
        tags: Option<Vec<String>>,
        notes: Option<String>,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut guard = self.inner.write().await;
        let rec = guard
            .executions
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| StoreError::not_found("execution", id.as_str()))?;
        if let Some(d) = description {
            rec.description = Some(d);
        }
        if let Some(t) = tags {
            rec.tags = t;
        }
        if let Some(n) = notes {
            rec.notes = Some(n);
        }
        Ok(rec.clone())
    }

    // ── Skill lifecycle ───────────────────────────────────────────────────────

    async fn insert_candidate(&self, rec: &SkillCandidate) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.candidates.insert(rec.id.clone(), rec.clone());
        Ok(())
    }

    async fn get_candidate(
        &self,
        id: &CandidateId,
    ) -> Result<Option<SkillCandidate>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.candidates.get(id).cloned())
    }

    async fn list_candidates(
        &self,
        owner: &Owner,
        skill_key: Option<&str>,
    ) -> Result<Vec<SkillCandidate>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<SkillCandidate> = guard
            .candidates
            .values()
            .filter(|c| &c.owner == owner)
            .filter(|c| skill_key.map_or(true, |k| c.skill_key == k))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update_candidate(&self, rec: &SkillCandidate) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.candidates.contains_key(&rec.id) {
            return Err(StoreError::not_found("skill_candidate", rec.id.as_str()));
        }
        let mut updated = rec.clone();
        updated.updated_at = Utc::now();
        guard.candidates.insert(rec.id.clone(), updated);
        Ok(())
    }

    async fn insert_release(&self, rec: &SkillRelease) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if rec.status == ReleaseStatus::Active {
            let clash = guard.releases.values().any(|r| {
                r.owner == rec.owner
                    && r.skill_key == rec.skill_key
                    && r.stage == rec.stage
                    && r.status == ReleaseStatus::Active
                    && r.id != rec.id
            });
            if clash {
                return Err(StoreError::Duplicate { constraint: "releases.active_per_stage" });
            }
        }
        guard.releases.insert(rec.id.clone(), rec.clone());
        Ok(())
    }

    async fn get_release(&self, id: &ReleaseId) -> Result<Option<SkillRelease>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.releases.get(id).cloned())
    }

    async fn list_releases(
        &self,
        owner: &Owner,
        skill_key: Option<&str>,
    ) -> Result<Vec<SkillRelease>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<SkillRelease> = guard
            .releases
            .values()
            .filter(|r| &r.owner == owner)
            .filter(|r| skill_key.map_or(true, |k| r.skill_key == k))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(out)
    }

    async fn update_release(&self, rec: &SkillRelease) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.releases.contains_key(&rec.id) {
            return Err(StoreError::not_found("skill_release", rec.id.as_str()));
        }
        let mut updated = rec.clone();
        updated.updated_at = Utc::now();
        guard.releases.insert(rec.id.clone(), updated);
        Ok(())
    }

    async fn active_release(
        &self,
        owner: &Owner,
        skill_key: &str,
        stage: SkillStage,
    ) -> Result<Option<SkillRelease>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .releases
            .values()
            .find(|r| {
                &r.owner == owner
                    && r.skill_key == skill_key
                    && r.stage == stage
                    && r.status == ReleaseStatus::Active
            })
            .cloned())
    }

    // ── GC leases ─────────────────────────────────────────────────────────────

    async fn try_acquire_lease(
        &self,
        task: &str,
        holder: &str,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        match guard.leases.get(task) {
            Some(lease) if lease.holder != holder && lease.expires_at > now => Ok(false),
            _ => {
                guard.leases.insert(
                    task.to_string(),
                    GcLease {
                        task: task.to_string(),
                        holder: holder.to_string(),
                        expires_at: now + Duration::seconds(ttl_secs as i64),
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, task: &str, holder: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.leases.get(task).map_or(false, |l| l.holder == holder) {
            guard.leases.remove(task);
        }
        Ok(())
    }
}

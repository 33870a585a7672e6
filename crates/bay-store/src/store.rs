use async_trait::async_trait;
use chrono::{DateTime, Utc};
use bay_domain::{
    CandidateId, CargoId, ExecutionId, Owner, ReleaseId, SandboxId, SessionId, SkillStage,
};

use crate::error::StoreError;
use crate::state::{
    CargoRecord, ExecutionFilter, ExecutionRecord, IdempotencyRecord, SandboxRecord,
    SessionRecord, SkillCandidate, SkillRelease,
};

/// Persistence boundary for all Bay state.
///
/// Update methods use optimistic concurrency: the caller passes the record
/// at the version it was read, the store compares against the stored version
/// and writes `version + 1`, or fails with [`StoreError::VersionConflict`].
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    // ── Sandboxes ─────────────────────────────────────────────────────────────

    async fn insert_sandbox(&self, rec: &SandboxRecord) -> Result<(), StoreError>;

    /// Raw lookup, including soft-deleted rows. Owner scoping and
    /// deleted-row hiding are the managers' concern.
    async fn get_sandbox(&self, id: &SandboxId) -> Result<Option<SandboxRecord>, StoreError>;

    /// Owner-scoped listing; soft-deleted rows are hidden.
    async fn list_sandboxes(&self, owner: &Owner) -> Result<Vec<SandboxRecord>, StoreError>;

    /// Every non-deleted sandbox, all owners. GC's scan surface.
    async fn list_all_sandboxes(&self) -> Result<Vec<SandboxRecord>, StoreError>;

    async fn update_sandbox(&self, rec: &SandboxRecord) -> Result<SandboxRecord, StoreError>;

    // ── Sessions ──────────────────────────────────────────────────────────────

    /// Insert a new session. Fails with [`StoreError::Duplicate`] if the
    /// sandbox already has a live (non-stopped, non-failed) session.
    async fn insert_session(&self, rec: &SessionRecord) -> Result<(), StoreError>;

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError>;

    /// The sandbox's current live session, if any.
    async fn get_live_session(
        &self,
        sandbox_id: &SandboxId,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// All live sessions, all sandboxes. Scan surface for the idle reaper
    /// and the orphan-container reaper.
    async fn list_live_sessions(&self) -> Result<Vec<SessionRecord>, StoreError>;

    async fn update_session(&self, rec: &SessionRecord) -> Result<SessionRecord, StoreError>;

    // ── Cargos ────────────────────────────────────────────────────────────────

    async fn insert_cargo(&self, rec: &CargoRecord) -> Result<(), StoreError>;

    async fn get_cargo(&self, id: &CargoId) -> Result<Option<CargoRecord>, StoreError>;

    async fn list_cargos(&self, owner: &Owner) -> Result<Vec<CargoRecord>, StoreError>;

    /// Every non-deleted cargo, all owners. Orphan-cargo GC scan surface.
    async fn list_all_cargos(&self) -> Result<Vec<CargoRecord>, StoreError>;

    async fn update_cargo(&self, rec: &CargoRecord) -> Result<(), StoreError>;

    /// Ids of non-deleted sandboxes whose cargo-id points at `id`.
    /// Drives the active-reference count for external cargo deletion.
    async fn sandboxes_referencing_cargo(
        &self,
        id: &CargoId,
    ) -> Result<Vec<SandboxId>, StoreError>;

    // ── Idempotency keys ──────────────────────────────────────────────────────

    /// Atomically claim `(owner, scope, key)`. Returns `None` when this
    /// caller won the insert race (proceed with the handler), or the
    /// existing record when another request got there first. Expired
    /// records are replaced as if absent.
    async fn claim_idempotency_key(
        &self,
        rec: &IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Attach the response snapshot to a claimed key and mark it complete.
    async fn complete_idempotency_key(
        &self,
        owner: &Owner,
        scope: &str,
        key: &str,
        status_code: u16,
        response: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Drop a claimed key after a handler failure so the client can retry.
    async fn release_idempotency_key(
        &self,
        owner: &Owner,
        scope: &str,
        key: &str,
    ) -> Result<(), StoreError>;

    // ── Execution history ─────────────────────────────────────────────────────

    async fn insert_execution(&self, rec: &ExecutionRecord) -> Result<(), StoreError>;

    async fn get_execution(&self, id: &ExecutionId)
        -> Result<Option<ExecutionRecord>, StoreError>;

    /// Newest first.
    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    async fn last_execution(
        &self,
        sandbox_id: &SandboxId,
    ) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Update only the annotation fields; everything else is immutable.
    async fn annotate_execution(
        &self,
        id: &ExecutionId,
        description: Option<String>,
        tags: Option<Vec<String>>,
        notes: Option<String>,
    ) -> Result<ExecutionRecord, StoreError>;

    // ── Skill lifecycle ───────────────────────────────────────────────────────

    async fn insert_candidate(&self, rec: &SkillCandidate) -> Result<(), StoreError>;

    async fn get_candidate(&self, id: &CandidateId)
        -> Result<Option<SkillCandidate>, StoreError>;

    async fn list_candidates(
        &self,
        owner: &Owner,
        skill_key: Option<&str>,
    ) -> Result<Vec<SkillCandidate>, StoreError>;

    async fn update_candidate(&self, rec: &SkillCandidate) -> Result<(), StoreError>;

    async fn insert_release(&self, rec: &SkillRelease) -> Result<(), StoreError>;

    async fn get_release(&self, id: &ReleaseId) -> Result<Option<SkillRelease>, StoreError>;

    async fn list_releases(
        &self,
        owner: &Owner,
        skill_key: Option<&str>,
    ) -> Result<Vec<SkillRelease>, StoreError>;

    async fn update_release(&self, rec: &SkillRelease) -> Result<(), StoreError>;

    /// The single active release for `(owner, skill_key, stage)`, if any.
    async fn active_release(
        &self,
        owner: &Owner,
        skill_key: &str,
        stage: SkillStage,
    ) -> Result<Option<SkillRelease>, StoreError>;

    // ── GC leases ─────────────────────────────────────────────────────────────

    /// Take (or take over an expired) lease for a GC task. Returns whether
    /// this holder now owns the lease.
    async fn try_acquire_lease(
        &self,
        task: &str,
        holder: &str,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn release_lease(&self, task: &str, holder: &str) -> Result<(), StoreError>;
}

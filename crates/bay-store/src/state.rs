use chrono::{DateTime, Utc};
use bay_domain::{
    Capability, CargoId, CargoKind, CandidateId, CandidateState, ContainerRole, DesiredState,
    ExecType, ExecutionId, Owner, ProfileId, ReleaseId, ReleaseStatus, RuntimeKind, SandboxId,
    SessionId, SessionState, SkillStage,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ── Sandbox ──────────────────────────────────────────────────────────────────

/// Persistent sandbox row. `version` increments on every successful write
/// and backs optimistic concurrency across instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub id: SandboxId,
    pub owner: Owner,
    pub profile_id: ProfileId,
    pub cargo_id: CargoId,
    pub current_session_id: Option<SessionId>,
    pub desired_state: DesiredState,
    /// Absolute expiry. `None` means the sandbox never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// `last_activity + idle_timeout`; recomputed on every touch.
    pub idle_expires_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl SandboxRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |exp| now > exp)
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Observed state of a single container within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    #[default]
    Pending,
    Running,
    Exited,
    Failed,
}

/// One container of a session's group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub role: ContainerRole,
    pub image: String,
    pub runtime_kind: RuntimeKind,
    /// Backend container id; `None` until created.
    pub container_id: Option<String>,
    /// Address the runtime is reachable on; `None` until started.
    pub endpoint: Option<String>,
    pub capabilities: Vec<Capability>,
    pub observed_state: ContainerState,
}

/// Persistent session row: the container group currently (or last) realizing
/// a sandbox's compute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub sandbox_id: SandboxId,
    /// Running or Stopped; sessions are replaced rather than deleted.
    pub desired_state: DesiredState,
    pub observed_state: SessionState,
    /// Ordered per-container records, start order.
    pub containers: Vec<ContainerRecord>,
    /// Name of the primary container within `containers`.
    pub primary_container: String,
    /// Endpoint of the primary container, cached for routing.
    pub endpoint: Option<String>,
    /// Session-scoped network for multi-container groups.
    pub network_id: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub idle_timeout_secs: u64,
    pub ready_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl SessionRecord {
    pub fn container(&self, name: &str) -> Option<&ContainerRecord> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut ContainerRecord> {
        self.containers.iter_mut().find(|c| c.name == name)
    }

    pub fn primary(&self) -> Option<&ContainerRecord> {
        self.container(&self.primary_container)
    }

    pub fn idle_deadline(&self) -> DateTime<Utc> {
        self.last_activity + chrono::Duration::seconds(self.idle_timeout_secs as i64)
    }

    pub fn is_live(&self) -> bool {
        self.observed_state.is_live()
    }
}

// ── Cargo ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoRecord {
    pub id: CargoId,
    pub owner: Owner,
    /// Backend volume name or claim name.
    pub backend_handle: String,
    pub kind: CargoKind,
    pub mount_path: String,
    /// Set iff `kind == Managed`.
    pub managed_by: Option<SandboxId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CargoRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ── Idempotency ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Complete,
}

/// Cached outcome of a non-idempotent mutating request.
/// Unique on `(owner, scope, key)`; the insert race picks the winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub owner: Owner,
    /// Endpoint scope, e.g. `POST /v1/sandboxes`.
    pub scope: String,
    pub key: String,
    /// SHA-256 over the canonicalised request body.
    pub fingerprint: String,
    pub status: IdempotencyStatus,
    pub status_code: Option<u16>,
    pub response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Serialize `body` to canonical JSON (object keys sorted) and return its
/// SHA-256 hex digest. Map iteration order must not affect the fingerprint.
pub fn request_fingerprint<T: Serialize>(body: &T) -> String {
    let v = serde_json::to_value(body).unwrap_or(serde_json::Value::Null);
    let canonical = sort_json_keys(v);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

fn sort_json_keys(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_json_keys(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(sort_json_keys).collect())
        }
        other => other,
    }
}

// ── Execution history ────────────────────────────────────────────────────────

/// One capability invocation. Immutable except for the annotation fields
/// (`description`, `tags`, `notes`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub sandbox_id: SandboxId,
    pub owner: Owner,
    pub exec_type: ExecType,
    /// Code, command line, or serialized batch input.
    pub input: String,
    pub output: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
}

/// Filter for history listings; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub owner: Option<Owner>,
    pub sandbox_id: Option<SandboxId>,
    pub exec_type: Option<ExecType>,
    pub success: Option<bool>,
    pub tag: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

// ── Skill lifecycle ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEvaluation {
    pub passed: bool,
    pub score: f64,
    pub notes: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillCandidate {
    pub id: CandidateId,
    pub owner: Owner,
    pub skill_key: String,
    pub execution_ids: Vec<ExecutionId>,
    pub state: CandidateState,
    pub evaluation: Option<SkillEvaluation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRelease {
    pub id: ReleaseId,
    pub owner: Owner,
    pub skill_key: String,
    /// Monotonic per skill key.
    pub version: u32,
    pub stage: SkillStage,
    pub status: ReleaseStatus,
    pub candidate_id: CandidateId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── GC leases ────────────────────────────────────────────────────────────────

/// Row-level lease taken by a GC task before running, so a dead instance
/// cannot starve the cluster: leases expire and are taken over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcLease {
    pub task: String,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = json!({ "b": 1, "a": { "y": 2, "x": 3 } });
        let b = json!({ "a": { "x": 3, "y": 2 }, "b": 1 });
        assert_eq!(request_fingerprint(&a), request_fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_bodies() {
        let a = json!({ "profile": "python-default", "ttl_seconds": 600 });
        let b = json!({ "profile": "python-default", "ttl_seconds": 601 });
        assert_ne!(request_fingerprint(&a), request_fingerprint(&b));
    }

    #[test]
    fn session_idle_deadline() {
        let now = Utc::now();
        let rec = SessionRecord {
            id: SessionId::generate(),
            sandbox_id: SandboxId::generate(),
            desired_state: DesiredState::Running,
            observed_state: SessionState::Running,
            containers: vec![],
            primary_container: "main".into(),
            endpoint: None,
            network_id: None,
            last_activity: now,
            idle_timeout_secs: 300,
            ready_at: Some(now),
            failed_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        assert_eq!(rec.idle_deadline(), now + chrono::Duration::seconds(300));
    }
}

use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────────────

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                $name(s.into())
            }

            /// Mint a fresh prefixed UUIDv4 id.
            pub fn generate() -> Self {
                $name(format!(concat!($prefix, "-{}"), uuid::Uuid::new_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Stable, caller-visible handle for an execution environment.
    SandboxId, "sbx"
);
id_type!(
    /// One ephemeral container group realizing a sandbox's compute.
    SessionId, "ses"
);
id_type!(
    /// A persistent data volume.
    CargoId, "crg"
);
id_type!(ExecutionId, "exe");
id_type!(CandidateId, "cand");
id_type!(ReleaseId, "rel");

/// Immutable container-composition template; ids are operator-chosen names
/// like `python-default`, not UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(pub String);

impl ProfileId {
    pub fn new(s: impl Into<String>) -> Self {
        ProfileId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner scope derived from the caller's credentials. Every sandbox, cargo
/// and history row is tagged with one; lookups never cross owners.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner(pub String);

impl Owner {
    pub fn new(s: impl Into<String>) -> Self {
        Owner(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Sandbox state ────────────────────────────────────────────────────────────

/// The caller's intent for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    Running,
    Stopped,
    Deleted,
}

impl std::fmt::Display for DesiredState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DesiredState::Running => write!(f, "running"),
            DesiredState::Stopped => write!(f, "stopped"),
            DesiredState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Computed, caller-visible sandbox status. A pure function of the sandbox
/// row and its current session; see [`crate::status::sandbox_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Idle,
    Starting,
    Ready,
    Failed,
    Degraded,
    Expired,
    Deleted,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxStatus::Idle => "idle",
            SandboxStatus::Starting => "starting",
            SandboxStatus::Ready => "ready",
            SandboxStatus::Failed => "failed",
            SandboxStatus::Degraded => "degraded",
            SandboxStatus::Expired => "expired",
            SandboxStatus::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

// ── Session state ────────────────────────────────────────────────────────────

/// Observed lifecycle state of a session's container group.
///
/// Transitions:
///   Pending → Starting → Running ↔ Degraded
///   Running | Degraded → Stopping → Stopped
///   any → Failed (terminal; the session is replaced, never resumed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Pending,
    Starting,
    Running,
    Degraded,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    /// A live session blocks creation of a replacement for its sandbox.
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Pending => "pending",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Degraded => "degraded",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// ── Cargo ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CargoKind {
    /// Owned by exactly one sandbox; deleted when that sandbox is deleted.
    Managed,
    /// Shared by reference; deletable only at zero active references.
    External,
}

impl std::fmt::Display for CargoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CargoKind::Managed => write!(f, "managed"),
            CargoKind::External => write!(f, "external"),
        }
    }
}

// ── Runtimes and capabilities ────────────────────────────────────────────────

/// Which wire protocol a container speaks on its runtime port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// Code-execution runtime: kernel host, shell executor, filesystem server.
    Ship,
    /// Browser-automation runtime: CLI wrapper.
    Browser,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Ship => write!(f, "ship"),
            RuntimeKind::Browser => write!(f, "browser"),
        }
    }
}

/// A named operation family a runtime container provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Python,
    Shell,
    Filesystem,
    Browser,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Python => "python",
            Capability::Shell => "shell",
            Capability::Filesystem => "filesystem",
            Capability::Browser => "browser",
        }
    }

    pub fn parse(s: &str) -> Option<Capability> {
        match s {
            "python" => Some(Capability::Python),
            "shell" => Some(Capability::Shell),
            "filesystem" => Some(Capability::Filesystem),
            "browser" => Some(Capability::Browser),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fine-grained operation type recorded in execution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecType {
    Python,
    Shell,
    FsRead,
    FsWrite,
    FsList,
    FsDelete,
    FsUpload,
    FsDownload,
    Browser,
    BrowserBatch,
}

impl ExecType {
    /// The capability family that serves this operation.
    pub fn capability(&self) -> Capability {
        match self {
            ExecType::Python => Capability::Python,
            ExecType::Shell => Capability::Shell,
            ExecType::FsRead
            | ExecType::FsWrite
            | ExecType::FsList
            | ExecType::FsDelete
            | ExecType::FsUpload
            | ExecType::FsDownload => Capability::Filesystem,
            ExecType::Browser | ExecType::BrowserBatch => Capability::Browser,
        }
    }

    /// Whether a call of this type carries semantic weight worth a history row.
    pub fn is_recorded(&self) -> bool {
        matches!(
            self,
            ExecType::Python | ExecType::Shell | ExecType::Browser | ExecType::BrowserBatch
        )
    }
}

impl std::fmt::Display for ExecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecType::Python => "python",
            ExecType::Shell => "shell",
            ExecType::FsRead => "fs_read",
            ExecType::FsWrite => "fs_write",
            ExecType::FsList => "fs_list",
            ExecType::FsDelete => "fs_delete",
            ExecType::FsUpload => "fs_upload",
            ExecType::FsDownload => "fs_download",
            ExecType::Browser => "browser",
            ExecType::BrowserBatch => "browser_batch",
        };
        write!(f, "{}", s)
    }
}

// ── Containers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRole {
    /// Serves the session endpoint and gates readiness.
    Primary,
    /// Auxiliary container; its failure degrades rather than fails the session.
    Sidecar,
}

impl std::fmt::Display for ContainerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerRole::Primary => write!(f, "primary"),
            ContainerRole::Sidecar => write!(f, "sidecar"),
        }
    }
}

// ── Skill lifecycle ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStage {
    Canary,
    Stable,
}

impl std::fmt::Display for SkillStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkillStage::Canary => write!(f, "canary"),
            SkillStage::Stable => write!(f, "stable"),
        }
    }
}

/// Candidate lifecycle: draft → evaluating → evaluated → promoted | rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    #[default]
    Draft,
    Evaluating,
    Evaluated,
    Promoted,
    Rejected,
}

impl std::fmt::Display for CandidateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CandidateState::Draft => "draft",
            CandidateState::Evaluating => "evaluating",
            CandidateState::Evaluated => "evaluated",
            CandidateState::Promoted => "promoted",
            CandidateState::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Active,
    Superseded,
    RolledBack,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseStatus::Active => write!(f, "active"),
            ReleaseStatus::Superseded => write!(f, "superseded"),
            ReleaseStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

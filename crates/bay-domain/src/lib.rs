pub mod error;
pub mod path;
pub mod profile;
pub mod status;
pub mod types;

pub use error::DomainError;
pub use path::validate_workspace_path;
pub use profile::{ContainerBlueprint, Profile};
pub use status::sandbox_status;
pub use types::{
    Capability, CargoId, CargoKind, CandidateId, CandidateState, ContainerRole, DesiredState,
    ExecType, ExecutionId, Owner, ProfileId, ReleaseId, ReleaseStatus, RuntimeKind, SandboxId,
    SandboxStatus, SessionId, SessionState, SkillStage,
};

/// Conventional mount path for cargo volumes inside every runtime container.
/// Relative paths in filesystem and browser operations resolve against it.
pub const WORKSPACE_MOUNT: &str = "/workspace";

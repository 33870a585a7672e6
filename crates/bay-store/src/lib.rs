pub mod error;
pub mod memory;
pub mod postgres_store;
pub mod state;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres_store::PostgresStore;
pub use state::{
    CargoRecord, ContainerRecord, ContainerState, ExecutionFilter, ExecutionRecord, GcLease,
    IdempotencyRecord, IdempotencyStatus, SandboxRecord, SessionRecord, SkillCandidate,
    SkillEvaluation, SkillRelease, request_fingerprint,
};
pub use store::StateStore;

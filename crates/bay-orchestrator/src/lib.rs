pub mod cargo;
pub mod error;
pub mod gc;
pub mod history;
pub mod idempotency;
pub mod locks;
pub mod router;
pub mod sandbox;
pub mod session;
pub mod skills;

#[cfg(test)]
mod testutil;

pub use cargo::CargoManager;
pub use error::OrchestratorError;
pub use gc::Gc;
pub use history::{HistoryQuery, HistoryService};
pub use idempotency::{IdempotencyOutcome, IdempotencyService};
pub use locks::SandboxLocks;
pub use router::CapabilityRouter;
pub use sandbox::{CreateSandboxParams, SandboxManager};
pub use session::SessionManager;
pub use skills::SkillService;

use std::sync::Arc;

use bay_adapter::AdapterPool;
use bay_config::{BaySettings, ProfileCatalog};
use bay_driver::Driver;
use bay_store::StateStore;

/// The wired orchestration core: one of these per process, shared by the
/// HTTP surface and the GC tasks.
pub struct Bay {
    pub catalog: Arc<ProfileCatalog>,
    pub cargos: Arc<CargoManager>,
    pub sandboxes: Arc<SandboxManager>,
    pub router: Arc<CapabilityRouter>,
    pub history: Arc<HistoryService>,
    pub skills: Arc<SkillService>,
    pub idempotency: Arc<IdempotencyService>,
    pub gc: Arc<Gc>,
}

impl Bay {
    pub fn new(
        store: Arc<dyn StateStore>,
        driver: Arc<dyn Driver>,
        catalog: ProfileCatalog,
        settings: &BaySettings,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let pool = Arc::new(AdapterPool::new());
        let locks = Arc::new(SandboxLocks::new());

        let cargos = Arc::new(CargoManager::new(
            store.clone(),
            driver.clone(),
            settings.instance.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            driver.clone(),
            pool.clone(),
            catalog.clone(),
            settings.runtime.clone(),
            settings.instance.clone(),
        ));
        let sandboxes = Arc::new(SandboxManager::new(
            store.clone(),
            locks,
            sessions,
            cargos.clone(),
            catalog.clone(),
            settings.defaults.max_sandboxes_per_owner,
        ));
        let history = Arc::new(HistoryService::new(store.clone()));
        let router = Arc::new(CapabilityRouter::new(
            sandboxes.clone(),
            catalog.clone(),
            pool,
            history.clone(),
            settings.runtime.clone(),
        ));
        let skills = Arc::new(SkillService::new(store.clone()));
        let idempotency = Arc::new(IdempotencyService::new(
            store.clone(),
            settings.gc.idempotency_ttl_secs,
        ));
        let gc = Arc::new(Gc::new(
            store,
            driver,
            sandboxes.clone(),
            cargos.clone(),
            settings.gc.clone(),
            settings.instance.clone(),
        ));

        Self { catalog, cargos, sandboxes, router, history, skills, idempotency, gc }
    }
}

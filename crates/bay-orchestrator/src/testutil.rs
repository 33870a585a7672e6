use std::sync::Arc;

use chrono::Utc;
use bay_adapter::AdapterPool;
use bay_config::{ProfileCatalog, RuntimeSettings};
use bay_domain::{Owner, ProfileId, SandboxId};
use bay_driver::StubDriver;
use bay_store::{InMemoryStore, SandboxRecord};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::cargo::CargoManager;
use crate::locks::SandboxLocks;
use crate::sandbox::{CreateSandboxParams, SandboxManager};
use crate::session::SessionManager;

pub(crate) const INSTANCE: &str = "inst-test";

/// Fully wired orchestration stack over the stub driver and the in-memory
/// store, shared by the manager test modules.
pub(crate) struct TestBay {
    pub store: Arc<InMemoryStore>,
    pub driver: Arc<StubDriver>,
    pub pool: Arc<AdapterPool>,
    pub catalog: Arc<ProfileCatalog>,
    pub locks: Arc<SandboxLocks>,
    pub cargos: Arc<CargoManager>,
    pub sandboxes: Arc<SandboxManager>,
}

impl TestBay {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(StubDriver::new());
        let pool = Arc::new(AdapterPool::new());
        let catalog = Arc::new(ProfileCatalog::builtin(300));
        let locks = Arc::new(SandboxLocks::new());
        let runtime = RuntimeSettings {
            readiness_deadline_secs: 5,
            readiness_initial_backoff_ms: 20,
            call_timeout_secs: 5,
            max_call_timeout_secs: 30,
        };

        let cargos =
            Arc::new(CargoManager::new(store.clone(), driver.clone(), INSTANCE.into()));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            driver.clone(),
            pool.clone(),
            catalog.clone(),
            runtime,
            INSTANCE.into(),
        ));
        let sandboxes = Arc::new(SandboxManager::new(
            store.clone(),
            locks.clone(),
            sessions,
            cargos.clone(),
            catalog.clone(),
            None,
        ));
        Self { store, driver, pool, catalog, locks, cargos, sandboxes }
    }

    /// A ready ship runtime answering `/meta`, with the stub driver's
    /// endpoint pointed at it.
    pub async fn with_ready_runtime() -> (Self, MockServer) {
        let bay = Self::new();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "mount_path": bay_domain::WORKSPACE_MOUNT,
                "capabilities": ["python", "shell", "filesystem", "browser"],
                "runtime_kind": "ship",
                "api_version": "1.0",
            })))
            .mount(&server)
            .await;
        bay.driver.set_endpoint(server.uri());
        (bay, server)
    }

    pub fn owner() -> Owner {
        Owner::new("alice")
    }

    pub async fn create_sandbox(&self, profile: &str, ttl: Option<u64>) -> SandboxRecord {
        let (record, _status) = self
            .sandboxes
            .create(
                &Self::owner(),
                CreateSandboxParams {
                    profile_id: ProfileId::new(profile),
                    ttl_seconds: ttl,
                    cargo_id: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        record
    }

    pub async fn running_sandbox(&self, profile: &str) -> SandboxId {
        let record = self.create_sandbox(profile, None).await;
        self.sandboxes
            .ensure_running(&Self::owner(), &record.id, Utc::now())
            .await
            .unwrap();
        record.id
    }
}

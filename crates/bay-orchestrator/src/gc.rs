use std::sync::Arc;

use chrono::Utc;
use bay_config::GcSettings;
use bay_domain::{CargoKind, SessionState};
use bay_driver::Driver;
use bay_store::StateStore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cargo::CargoManager;
use crate::error::OrchestratorError;
use crate::sandbox::SandboxManager;

/// Garbage-collection coordinator: four idempotent, crash-safe tasks on
/// independent periodic schedules. Destructive actions go through the same
/// per-sandbox locks as request handlers; in multi-instance deployments
/// each task optionally takes a store lease first.
pub struct Gc {
    store: Arc<dyn StateStore>,
    driver: Arc<dyn Driver>,
    sandboxes: Arc<SandboxManager>,
    cargos: Arc<CargoManager>,
    settings: GcSettings,
    instance: String,
}

impl Gc {
    pub fn new(
        store: Arc<dyn StateStore>,
        driver: Arc<dyn Driver>,
        sandboxes: Arc<SandboxManager>,
        cargos: Arc<CargoManager>,
        settings: GcSettings,
        instance: String,
    ) -> Self {
        Self { store, driver, sandboxes, cargos, settings, instance }
    }

    /// Spawn the periodic tasks. Handles live for the process lifetime.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let schedule: [(&'static str, u64); 4] = [
            ("idle-sessions", self.settings.idle_interval_secs),
            ("expired-sandboxes", self.settings.expired_interval_secs),
            ("orphan-cargos", self.settings.orphan_cargo_interval_secs),
            ("orphan-containers", self.settings.orphan_container_interval_secs),
        ];
        schedule
            .into_iter()
            .map(|(task, secs)| {
                let gc = self.clone();
                tokio::spawn(async move {
                    let mut ticker =
                        tokio::time::interval(std::time::Duration::from_secs(secs.max(1)));
                    ticker.set_missed_tick_behavior(
                        tokio::time::MissedTickBehavior::Skip,
                    );
                    loop {
                        ticker.tick().await;
                        gc.run_task(task).await;
                    }
                })
            })
            .collect()
    }

    /// Run every task once; the admin trigger endpoint.
    pub async fn run_all_once(&self) {
        for task in ["idle-sessions", "expired-sandboxes", "orphan-cargos", "orphan-containers"]
        {
            self.run_task(task).await;
        }
    }

    async fn run_task(&self, task: &str) {
        if self.settings.lease_enabled {
            let acquired = self
                .store
                .try_acquire_lease(task, &self.instance, self.settings.lease_ttl_secs, Utc::now())
                .await;
            match acquired {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task, "lease held elsewhere, skipping run");
                    return;
                }
                Err(e) => {
                    warn!(task, error = %e, "lease acquisition failed");
                    return;
                }
            }
        }

        let result = match task {
            "idle-sessions" => self.reap_idle_sessions().await,
            "expired-sandboxes" => self.reap_expired_sandboxes().await,
            "orphan-cargos" => self.reap_orphan_cargos().await,
            "orphan-containers" => self.reap_orphan_containers().await,
            _ => Ok(0),
        };
        match result {
            Ok(0) => {}
            Ok(n) => info!(task, reaped = n, "gc pass complete"),
            Err(e) => warn!(task, error = %e, "gc pass failed"),
        }

        if self.settings.lease_enabled {
            if let Err(e) = self.store.release_lease(task, &self.instance).await {
                warn!(task, error = %e, "lease release failed");
            }
        }
    }

    /// Stop sessions idle past their profile's timeout. The re-read inside
    /// the sandbox lock (in `stop_if_idle`) lets a keepalive that landed
    /// during this scan win. Sandboxes are not destroyed, only compute.
    pub async fn reap_idle_sessions(&self) -> Result<usize, OrchestratorError> {
        let now = Utc::now();
        let mut reaped = 0;
        for session in self.store.list_live_sessions().await? {
            if !matches!(
                session.observed_state,
                SessionState::Running | SessionState::Degraded
            ) || now <= session.idle_deadline()
            {
                continue;
            }
            match self.sandboxes.stop_if_idle(&session.sandbox_id, now).await {
                Ok(true) => reaped += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(sandbox_id = %session.sandbox_id, error = %e, "idle reap failed")
                }
            }
        }
        Ok(reaped)
    }

    /// Soft-delete sandboxes past their absolute TTL, cascading their
    /// managed cargo. The expiry is re-checked inside the lock.
    pub async fn reap_expired_sandboxes(&self) -> Result<usize, OrchestratorError> {
        let now = Utc::now();
        let mut reaped = 0;
        for sandbox in self.store.list_all_sandboxes().await? {
            if !sandbox.is_expired(now) {
                continue;
            }
            match self.sandboxes.delete_if_expired(&sandbox.id, now).await {
                Ok(true) => reaped += 1,
                Ok(false) => {}
                Err(e) => warn!(sandbox_id = %sandbox.id, error = %e, "expiry reap failed"),
            }
        }
        Ok(reaped)
    }

    /// Destroy managed cargos whose owning sandbox is deleted or missing.
    /// External cargos are never touched here.
    pub async fn reap_orphan_cargos(&self) -> Result<usize, OrchestratorError> {
        let now = Utc::now();
        let mut reaped = 0;
        for cargo in self.store.list_all_cargos().await? {
            if cargo.kind != CargoKind::Managed {
                continue;
            }
            let orphaned = match &cargo.managed_by {
                None => true,
                Some(sandbox_id) => match self.store.get_sandbox(sandbox_id).await? {
                    None => true,
                    Some(s) => s.is_deleted(),
                },
            };
            if orphaned {
                self.cargos.delete_managed_cascade(&cargo.id, now).await?;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Destroy backend containers labeled to this instance whose session no
    /// longer lives. Recovers from crashes mid-orchestration: a session row
    /// is inserted before containers are created, so every legitimate
    /// container maps to a live session.
    pub async fn reap_orphan_containers(&self) -> Result<usize, OrchestratorError> {
        let mut reaped = 0;
        for summary in self.driver.list_containers(&self.instance).await? {
            let live = match &summary.session_id {
                None => false,
                Some(session_id) => self
                    .store
                    .get_session(&bay_domain::SessionId::new(session_id.clone()))
                    .await?
                    .map_or(false, |s| s.is_live()),
            };
            if !live {
                debug!(container_id = %summary.id, "destroying orphan container");
                self.driver.destroy_container(&summary.id).await?;
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

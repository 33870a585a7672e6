use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use bay_domain::{CargoId, CargoKind, Owner, SandboxId, WORKSPACE_MOUNT};
use bay_driver::{Driver, VolumeSpec, LABEL_INSTANCE, LABEL_MANAGED, LABEL_OWNER};
use bay_store::{CargoRecord, StateStore};
use tracing::{info, warn};

use crate::error::OrchestratorError;

/// Lifecycle and reference counting for persistent data volumes.
///
/// Managed cargos live and die with their owning sandbox; external cargos
/// are shared by reference and deletable only at zero active references.
pub struct CargoManager {
    store: Arc<dyn StateStore>,
    driver: Arc<dyn Driver>,
    instance: String,
}

impl CargoManager {
    pub fn new(store: Arc<dyn StateStore>, driver: Arc<dyn Driver>, instance: String) -> Self {
        Self { store, driver, instance }
    }

    /// Create the managed cargo for a sandbox being created. The backing
    /// volume is created first; if the record insert then fails the volume
    /// is destroyed so nothing leaks.
    pub async fn create_managed(
        &self,
        owner: &Owner,
        sandbox_id: &SandboxId,
        now: DateTime<Utc>,
    ) -> Result<CargoRecord, OrchestratorError> {
        self.create(owner, CargoKind::Managed, Some(sandbox_id.clone()), now).await
    }

    /// Create a shared external cargo.
    pub async fn create_external(
        &self,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> Result<CargoRecord, OrchestratorError> {
        self.create(owner, CargoKind::External, None, now).await
    }

    async fn create(
        &self,
        owner: &Owner,
        kind: CargoKind,
        managed_by: Option<SandboxId>,
        now: DateTime<Utc>,
    ) -> Result<CargoRecord, OrchestratorError> {
        let id = CargoId::generate();
        let mut labels = HashMap::new();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_INSTANCE.to_string(), self.instance.clone());
        labels.insert(LABEL_OWNER.to_string(), owner.to_string());

        let handle = self
            .driver
            .create_volume(&VolumeSpec { name: format!("bay-{}", id.as_str()), labels })
            .await?;

        let record = CargoRecord {
            id: id.clone(),
            owner: owner.clone(),
            backend_handle: handle.clone(),
            kind,
            mount_path: WORKSPACE_MOUNT.to_string(),
            managed_by,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        if let Err(e) = self.store.insert_cargo(&record).await {
            // Roll the volume back so a failed insert leaves nothing behind.
            if let Err(de) = self.driver.destroy_volume(&handle).await {
                warn!(cargo_id = %id, error = %de, "volume rollback failed");
            }
            return Err(e.into());
        }
        info!(cargo_id = %id, kind = %record.kind, "cargo created");
        Ok(record)
    }

    pub async fn get(
        &self,
        owner: &Owner,
        id: &CargoId,
    ) -> Result<CargoRecord, OrchestratorError> {
        match self.store.get_cargo(id).await? {
            Some(c) if &c.owner == owner && !c.is_deleted() => Ok(c),
            _ => Err(OrchestratorError::NotFound(format!("cargo '{id}'"))),
        }
    }

    pub async fn list(&self, owner: &Owner) -> Result<Vec<CargoRecord>, OrchestratorError> {
        Ok(self.store.list_cargos(owner).await?)
    }

    /// Caller-requested delete. Managed cargos are refused (they are deleted
    /// through their sandbox); external cargos require zero active
    /// references.
    pub async fn delete(
        &self,
        owner: &Owner,
        id: &CargoId,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        let cargo = self.get(owner, id).await?;
        if cargo.kind == CargoKind::Managed {
            return Err(OrchestratorError::Conflict(
                "managed cargo is deleted through its sandbox".into(),
            ));
        }
        let referencing = self.store.sandboxes_referencing_cargo(id).await?;
        if !referencing.is_empty() {
            let ids: Vec<String> =
                referencing.iter().map(|s| s.to_string()).collect();
            return Err(OrchestratorError::Conflict(format!(
                "cargo is referenced by sandboxes: {}",
                ids.join(", ")
            )));
        }
        self.destroy(cargo, now).await
    }

    /// Cascade path used by sandbox delete and by the orphan-cargo reaper.
    /// Not exposed to callers directly.
    pub async fn delete_managed_cascade(
        &self,
        id: &CargoId,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        let cargo = match self.store.get_cargo(id).await? {
            Some(c) if !c.is_deleted() => c,
            _ => return Ok(()), // already gone: cascade is idempotent
        };
        self.destroy(cargo, now).await
    }

    async fn destroy(
        &self,
        mut cargo: CargoRecord,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        self.driver.destroy_volume(&cargo.backend_handle).await?;
        cargo.deleted_at = Some(now);
        self.store.update_cargo(&cargo).await?;
        info!(cargo_id = %cargo.id, "cargo deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bay_driver::StubDriver;
    use bay_store::{InMemoryStore, SandboxRecord, StateStore};
    use bay_domain::{DesiredState, ProfileId};

    fn manager() -> (CargoManager, Arc<InMemoryStore>, Arc<StubDriver>) {
        let store = Arc::new(InMemoryStore::new());
        let driver = Arc::new(StubDriver::new());
        let mgr = CargoManager::new(store.clone(), driver.clone(), "inst-test".into());
        (mgr, store, driver)
    }

    fn sandbox_using(cargo: &CargoId, id: &str) -> SandboxRecord {
        let now = Utc::now();
        SandboxRecord {
            id: SandboxId::new(id),
            owner: Owner::new("alice"),
            profile_id: ProfileId::new("python-default"),
            cargo_id: cargo.clone(),
            current_session_id: None,
            desired_state: DesiredState::Running,
            expires_at: None,
            idle_expires_at: None,
            last_activity: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 0,
        }
    }

    #[tokio::test]
    async fn create_backs_record_with_volume() {
        let (mgr, _store, driver) = manager();
        let cargo = mgr.create_external(&Owner::new("alice"), Utc::now()).await.unwrap();
        assert!(driver.has_volume(&cargo.backend_handle));
        assert_eq!(cargo.mount_path, WORKSPACE_MOUNT);
    }

    #[tokio::test]
    async fn managed_delete_refused_directly() {
        let (mgr, _store, _driver) = manager();
        let owner = Owner::new("alice");
        let cargo = mgr
            .create_managed(&owner, &SandboxId::new("sbx-1"), Utc::now())
            .await
            .unwrap();
        let err = mgr.delete(&owner, &cargo.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Conflict(_)));
    }

    #[tokio::test]
    async fn external_delete_refused_while_referenced() {
        let (mgr, store, driver) = manager();
        let owner = Owner::new("alice");
        let cargo = mgr.create_external(&owner, Utc::now()).await.unwrap();
        store.insert_sandbox(&sandbox_using(&cargo.id, "user-1")).await.unwrap();

        let err = mgr.delete(&owner, &cargo.id, Utc::now()).await.unwrap_err();
        match err {
            OrchestratorError::Conflict(msg) => assert!(msg.contains("user-1")),
            other => panic!("expected Conflict, got {other:?}"),
        }
        assert!(driver.has_volume(&cargo.backend_handle));

        // Reference released: delete now succeeds and destroys the volume.
        let mut sbx = store.get_sandbox(&SandboxId::new("user-1")).await.unwrap().unwrap();
        sbx.deleted_at = Some(Utc::now());
        store.update_sandbox(&sbx).await.unwrap();
        mgr.delete(&owner, &cargo.id, Utc::now()).await.unwrap();
        assert!(!driver.has_volume(&cargo.backend_handle));
    }

    #[tokio::test]
    async fn cascade_is_idempotent() {
        let (mgr, _store, _driver) = manager();
        let cargo = mgr
            .create_managed(&Owner::new("alice"), &SandboxId::new("sbx-1"), Utc::now())
            .await
            .unwrap();
        mgr.delete_managed_cascade(&cargo.id, Utc::now()).await.unwrap();
        mgr.delete_managed_cascade(&cargo.id, Utc::now()).await.unwrap();
        // Unknown ids are fine too.
        mgr.delete_managed_cascade(&CargoId::new("ghost"), Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn get_is_owner_scoped() {
        let (mgr, _store, _driver) = manager();
        let cargo = mgr.create_external(&Owner::new("alice"), Utc::now()).await.unwrap();
        assert!(mgr.get(&Owner::new("bob"), &cargo.id).await.is_err());
        assert!(mgr.get(&Owner::new("alice"), &cargo.id).await.is_ok());
    }
}

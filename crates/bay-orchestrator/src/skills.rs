use std::sync::Arc;

use chrono::{DateTime, Utc};
use bay_domain::{
    CandidateId, CandidateState, ExecutionId, Owner, ReleaseId, ReleaseStatus, SkillStage,
};
use bay_store::{SkillCandidate, SkillEvaluation, SkillRelease, StateStore};
use tracing::info;

use crate::error::OrchestratorError;

/// Skill candidate/release lifecycle.
///
/// Candidates: draft → evaluated (pass) or rejected (fail) → promoted.
/// A promotion creates the next release for the skill key at the requested
/// stage, superseding the prior active one; rollback swaps the previous
/// release back in. At most one release per `(skill_key, stage)` is active.
pub struct SkillService {
    store: Arc<dyn StateStore>,
}

impl SkillService {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    // ── Candidates ────────────────────────────────────────────────────────────

    pub async fn create_candidate(
        &self,
        owner: &Owner,
        skill_key: &str,
        execution_ids: Vec<ExecutionId>,
        now: DateTime<Utc>,
    ) -> Result<SkillCandidate, OrchestratorError> {
        if skill_key.is_empty() {
            return Err(OrchestratorError::Validation("skill_key must not be empty".into()));
        }
        if execution_ids.is_empty() {
            return Err(OrchestratorError::Validation(
                "a candidate needs at least one execution".into(),
            ));
        }
        for id in &execution_ids {
            match self.store.get_execution(id).await? {
                Some(rec) if &rec.owner == owner => {}
                _ => {
                    return Err(OrchestratorError::Validation(format!(
                        "execution '{id}' does not exist"
                    )));
                }
            }
        }

        let candidate = SkillCandidate {
            id: CandidateId::generate(),
            owner: owner.clone(),
            skill_key: skill_key.to_string(),
            execution_ids,
            state: CandidateState::Draft,
            evaluation: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_candidate(&candidate).await?;
        info!(candidate_id = %candidate.id, skill_key, "skill candidate created");
        Ok(candidate)
    }

    pub async fn get_candidate(
        &self,
        owner: &Owner,
        id: &CandidateId,
    ) -> Result<SkillCandidate, OrchestratorError> {
        match self.store.get_candidate(id).await? {
            Some(c) if &c.owner == owner => Ok(c),
            _ => Err(OrchestratorError::NotFound(format!("skill candidate '{id}'"))),
        }
    }

    pub async fn list_candidates(
        &self,
        owner: &Owner,
        skill_key: Option<&str>,
    ) -> Result<Vec<SkillCandidate>, OrchestratorError> {
        Ok(self.store.list_candidates(owner, skill_key).await?)
    }

    /// Attach an evaluation result. A passing evaluation makes the
    /// candidate promotable; a failing one rejects it.
    pub async fn evaluate(
        &self,
        owner: &Owner,
        id: &CandidateId,
        passed: bool,
        score: f64,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SkillCandidate, OrchestratorError> {
        let mut candidate = self.get_candidate(owner, id).await?;
        if !matches!(candidate.state, CandidateState::Draft | CandidateState::Evaluating) {
            return Err(OrchestratorError::Conflict(format!(
                "candidate is {} and cannot be evaluated",
                candidate.state
            )));
        }
        candidate.evaluation =
            Some(SkillEvaluation { passed, score, notes, evaluated_at: now });
        candidate.state =
            if passed { CandidateState::Evaluated } else { CandidateState::Rejected };
        self.store.update_candidate(&candidate).await?;
        Ok(candidate)
    }

    // ── Releases ──────────────────────────────────────────────────────────────

    /// Promote an evaluated candidate into the next release at `stage`,
    /// superseding the prior active release for the key/stage.
    pub async fn promote(
        &self,
        owner: &Owner,
        id: &CandidateId,
        stage: SkillStage,
        now: DateTime<Utc>,
    ) -> Result<SkillRelease, OrchestratorError> {
        let mut candidate = self.get_candidate(owner, id).await?;
        match (&candidate.state, &candidate.evaluation) {
            (CandidateState::Evaluated, Some(eval)) if eval.passed => {}
            _ => {
                return Err(OrchestratorError::Conflict(format!(
                    "candidate is {} and cannot be promoted",
                    candidate.state
                )));
            }
        }

        let version = self
            .store
            .list_releases(owner, Some(&candidate.skill_key))
            .await?
            .iter()
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
            + 1;

        // Supersede first; the partial unique index would reject a second
        // active row if two promotions race, making the loser retryable.
        if let Some(mut prior) =
            self.store.active_release(owner, &candidate.skill_key, stage).await?
        {
            prior.status = ReleaseStatus::Superseded;
            self.store.update_release(&prior).await?;
        }

        let release = SkillRelease {
            id: ReleaseId::generate(),
            owner: owner.clone(),
            skill_key: candidate.skill_key.clone(),
            version,
            stage,
            status: ReleaseStatus::Active,
            candidate_id: candidate.id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_release(&release).await?;

        candidate.state = CandidateState::Promoted;
        self.store.update_candidate(&candidate).await?;
        info!(release_id = %release.id, skill_key = %release.skill_key,
            version = release.version, stage = %stage, "skill promoted");
        Ok(release)
    }

    pub async fn list_releases(
        &self,
        owner: &Owner,
        skill_key: Option<&str>,
    ) -> Result<Vec<SkillRelease>, OrchestratorError> {
        Ok(self.store.list_releases(owner, skill_key).await?)
    }

    pub async fn get_release(
        &self,
        owner: &Owner,
        id: &ReleaseId,
    ) -> Result<SkillRelease, OrchestratorError> {
        match self.store.get_release(id).await? {
            Some(r) if &r.owner == owner => Ok(r),
            _ => Err(OrchestratorError::NotFound(format!("skill release '{id}'"))),
        }
    }

    /// Mark the active release rolled back and re-activate its predecessor
    /// (the highest-version superseded release below it).
    pub async fn rollback(
        &self,
        owner: &Owner,
        id: &ReleaseId,
    ) -> Result<SkillRelease, OrchestratorError> {
        let mut current = self.get_release(owner, id).await?;
        if current.status != ReleaseStatus::Active {
            return Err(OrchestratorError::Conflict(format!(
                "release is {} and cannot be rolled back",
                current.status
            )));
        }

        let previous = self
            .store
            .list_releases(owner, Some(&current.skill_key))
            .await?
            .into_iter()
            .filter(|r| {
                r.stage == current.stage
                    && r.status == ReleaseStatus::Superseded
                    && r.version < current.version
            })
            .max_by_key(|r| r.version);
        let Some(mut previous) = previous else {
            return Err(OrchestratorError::Conflict(
                "no previous release to roll back to".into(),
            ));
        };

        current.status = ReleaseStatus::RolledBack;
        self.store.update_release(&current).await?;
        previous.status = ReleaseStatus::Active;
        self.store.update_release(&previous).await?;
        info!(release_id = %current.id, restored = %previous.id, "skill rolled back");
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bay_domain::{ExecType, SandboxId};
    use bay_store::{ExecutionRecord, InMemoryStore};

    async fn service_with_execution() -> (SkillService, Owner, ExecutionId) {
        let store = Arc::new(InMemoryStore::new());
        let owner = Owner::new("alice");
        let exec = ExecutionRecord {
            id: ExecutionId::generate(),
            sandbox_id: SandboxId::new("sbx-1"),
            owner: owner.clone(),
            exec_type: ExecType::Python,
            input: "print(1)".into(),
            output: Some("1\n".into()),
            stdout: None,
            stderr: None,
            exit_code: Some(0),
            success: true,
            duration_ms: 4,
            started_at: Utc::now(),
            tags: vec![],
            description: None,
            notes: None,
        };
        store.insert_execution(&exec).await.unwrap();
        (SkillService::new(store), owner, exec.id)
    }

    async fn evaluated_candidate(
        svc: &SkillService,
        owner: &Owner,
        exec: &ExecutionId,
        key: &str,
    ) -> SkillCandidate {
        let c = svc
            .create_candidate(owner, key, vec![exec.clone()], Utc::now())
            .await
            .unwrap();
        svc.evaluate(owner, &c.id, true, 0.9, None, Utc::now()).await.unwrap()
    }

    #[tokio::test]
    async fn candidate_requires_known_executions() {
        let (svc, owner, _exec) = service_with_execution().await;
        let err = svc
            .create_candidate(&owner, "summarise", vec![ExecutionId::new("ghost")], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn failing_evaluation_rejects_candidate() {
        let (svc, owner, exec) = service_with_execution().await;
        let c = svc
            .create_candidate(&owner, "summarise", vec![exec], Utc::now())
            .await
            .unwrap();
        let c = svc.evaluate(&owner, &c.id, false, 0.2, None, Utc::now()).await.unwrap();
        assert_eq!(c.state, CandidateState::Rejected);

        let err = svc.promote(&owner, &c.id, SkillStage::Stable, Utc::now()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Conflict(_)));
    }

    #[tokio::test]
    async fn promote_supersedes_prior_active() {
        let (svc, owner, exec) = service_with_execution().await;

        let c1 = evaluated_candidate(&svc, &owner, &exec, "summarise").await;
        let r1 = svc.promote(&owner, &c1.id, SkillStage::Stable, Utc::now()).await.unwrap();
        assert_eq!(r1.version, 1);
        assert_eq!(r1.status, ReleaseStatus::Active);

        let c2 = evaluated_candidate(&svc, &owner, &exec, "summarise").await;
        let r2 = svc.promote(&owner, &c2.id, SkillStage::Stable, Utc::now()).await.unwrap();
        assert_eq!(r2.version, 2);

        let r1 = svc.get_release(&owner, &r1.id).await.unwrap();
        assert_eq!(r1.status, ReleaseStatus::Superseded);

        // Exactly one active release for the key/stage.
        let actives: Vec<_> = svc
            .list_releases(&owner, Some("summarise"))
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.status == ReleaseStatus::Active)
            .collect();
        assert_eq!(actives.len(), 1);
        assert_eq!(actives[0].id, r2.id);
    }

    #[tokio::test]
    async fn stages_are_independent() {
        let (svc, owner, exec) = service_with_execution().await;
        let c1 = evaluated_candidate(&svc, &owner, &exec, "summarise").await;
        let r_canary =
            svc.promote(&owner, &c1.id, SkillStage::Canary, Utc::now()).await.unwrap();
        let c2 = evaluated_candidate(&svc, &owner, &exec, "summarise").await;
        let r_stable =
            svc.promote(&owner, &c2.id, SkillStage::Stable, Utc::now()).await.unwrap();

        assert_eq!(
            svc.get_release(&owner, &r_canary.id).await.unwrap().status,
            ReleaseStatus::Active
        );
        assert_eq!(
            svc.get_release(&owner, &r_stable.id).await.unwrap().status,
            ReleaseStatus::Active
        );
    }

    #[tokio::test]
    async fn rollback_restores_previous_release() {
        let (svc, owner, exec) = service_with_execution().await;
        let c1 = evaluated_candidate(&svc, &owner, &exec, "summarise").await;
        let r1 = svc.promote(&owner, &c1.id, SkillStage::Stable, Utc::now()).await.unwrap();
        let c2 = evaluated_candidate(&svc, &owner, &exec, "summarise").await;
        let r2 = svc.promote(&owner, &c2.id, SkillStage::Stable, Utc::now()).await.unwrap();

        let restored = svc.rollback(&owner, &r2.id).await.unwrap();
        assert_eq!(restored.id, r1.id);
        assert_eq!(restored.status, ReleaseStatus::Active);
        assert_eq!(
            svc.get_release(&owner, &r2.id).await.unwrap().status,
            ReleaseStatus::RolledBack
        );
    }

    #[tokio::test]
    async fn rollback_without_predecessor_conflicts() {
        let (svc, owner, exec) = service_with_execution().await;
        let c = evaluated_candidate(&svc, &owner, &exec, "summarise").await;
        let r = svc.promote(&owner, &c.id, SkillStage::Stable, Utc::now()).await.unwrap();
        let err = svc.rollback(&owner, &r.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Conflict(_)));
    }
}

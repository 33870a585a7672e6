use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use bay_domain::Owner;
use bay_store::{IdempotencyRecord, IdempotencyStatus, StateStore};
use tracing::debug;

use crate::error::OrchestratorError;

/// What the caller should do after presenting an idempotency key.
#[derive(Debug)]
pub enum IdempotencyOutcome {
    /// This request won the key: run the handler, then `complete` (or
    /// `abandon` on failure).
    Fresh,
    /// A byte-identical request already completed: replay its response.
    Replay { status_code: u16, response: serde_json::Value },
}

/// Fingerprints non-idempotent mutating requests and caches their replies
/// for the key TTL. The store's unique-constraint insert race picks the
/// winner under concurrency.
pub struct IdempotencyService {
    store: Arc<dyn StateStore>,
    ttl_secs: u64,
}

impl IdempotencyService {
    pub fn new(store: Arc<dyn StateStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    pub async fn begin(
        &self,
        owner: &Owner,
        scope: &str,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyOutcome, OrchestratorError> {
        let candidate = IdempotencyRecord {
            owner: owner.clone(),
            scope: scope.to_string(),
            key: key.to_string(),
            fingerprint: fingerprint.to_string(),
            status: IdempotencyStatus::InProgress,
            status_code: None,
            response: None,
            created_at: now,
            expires_at: now + Duration::seconds(self.ttl_secs as i64),
        };

        match self.store.claim_idempotency_key(&candidate, now).await? {
            None => {
                debug!(scope, key, "idempotency key claimed");
                Ok(IdempotencyOutcome::Fresh)
            }
            Some(existing) if existing.fingerprint != fingerprint => {
                Err(OrchestratorError::Conflict(
                    "idempotency key was already used with a different request body".into(),
                ))
            }
            Some(existing) => match (existing.status, existing.status_code, existing.response) {
                (IdempotencyStatus::Complete, Some(code), Some(response)) => {
                    Ok(IdempotencyOutcome::Replay { status_code: code, response })
                }
                _ => Err(OrchestratorError::Conflict(
                    "a request with this idempotency key is still in progress".into(),
                )),
            },
        }
    }

    /// Attach the winning handler's response so replays are byte-identical.
    pub async fn complete(
        &self,
        owner: &Owner,
        scope: &str,
        key: &str,
        status_code: u16,
        response: serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        self.store
            .complete_idempotency_key(owner, scope, key, status_code, response)
            .await?;
        Ok(())
    }

    /// Release a claimed key after a handler failure so the client may
    /// retry with the same key.
    pub async fn abandon(&self, owner: &Owner, scope: &str, key: &str) {
        if let Err(e) = self.store.release_idempotency_key(owner, scope, key).await {
            tracing::warn!(scope, key, error = %e, "failed to release idempotency key");
        }
    }
}

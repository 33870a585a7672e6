pub mod admin;
pub mod capabilities;
pub mod cargos;
pub mod history;
pub mod profiles;
pub mod sandboxes;
pub mod skills;

use std::future::Future;

use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use bay_domain::{Owner, SandboxStatus};
use bay_orchestrator::IdempotencyOutcome;
use bay_store::{request_fingerprint, CargoRecord, ExecutionRecord, SandboxRecord};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Run `handler` under the `Idempotency-Key` protocol when the header is
/// present: replay a completed identical request, conflict on reuse with a
/// different body, release the key if the handler fails.
pub(crate) async fn with_idempotency<F, Fut>(
    state: &AppState,
    owner: &Owner,
    scope: String,
    headers: &HeaderMap,
    body: &Value,
    handler: F,
) -> Result<(StatusCode, Value), ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(StatusCode, Value), ApiError>>,
{
    let key = headers
        .get(IDEMPOTENCY_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(key) = key else {
        return handler().await;
    };

    let fingerprint = request_fingerprint(body);
    match state.bay.idempotency.begin(owner, &scope, key, &fingerprint, Utc::now()).await? {
        IdempotencyOutcome::Replay { status_code, response } => Ok((
            StatusCode::from_u16(status_code).unwrap_or(StatusCode::OK),
            response,
        )),
        IdempotencyOutcome::Fresh => match handler().await {
            Ok((status, value)) => {
                state
                    .bay
                    .idempotency
                    .complete(owner, &scope, key, status.as_u16(), value.clone())
                    .await?;
                Ok((status, value))
            }
            Err(e) => {
                state.bay.idempotency.abandon(owner, &scope, key).await;
                Err(e)
            }
        },
    }
}

pub(crate) fn sandbox_json(record: &SandboxRecord, status: SandboxStatus) -> Value {
    json!({
        "id": record.id,
        "owner": record.owner,
        "profile": record.profile_id,
        "cargo_id": record.cargo_id,
        "current_session_id": record.current_session_id,
        "status": status,
        "desired_state": record.desired_state,
        "expires_at": record.expires_at,
        "idle_expires_at": record.idle_expires_at,
        "last_activity": record.last_activity,
        "created_at": record.created_at,
    })
}

pub(crate) fn cargo_json(record: &CargoRecord) -> Value {
    json!({
        "id": record.id,
        "owner": record.owner,
        "kind": record.kind,
        "mount_path": record.mount_path,
        "managed_by": record.managed_by,
        "created_at": record.created_at,
    })
}

pub(crate) fn execution_json(record: &ExecutionRecord) -> Value {
    json!({
        "id": record.id,
        "sandbox_id": record.sandbox_id,
        "type": record.exec_type,
        "input": record.input,
        "output": record.output,
        "stdout": record.stdout,
        "stderr": record.stderr,
        "exit_code": record.exit_code,
        "success": record.success,
        "duration_ms": record.duration_ms,
        "started_at": record.started_at,
        "tags": record.tags,
        "description": record.description,
        "notes": record.notes,
    })
}

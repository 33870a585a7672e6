use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use bay_domain::{CandidateId, ExecutionId, Owner, ReleaseId, SkillStage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::handlers::with_idempotency;
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateCandidateBody {
    pub skill_key: String,
    pub execution_ids: Vec<String>,
}

pub async fn create_candidate(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    headers: HeaderMap,
    Json(body): Json<CreateCandidateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body_value = serde_json::to_value(&body)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let (status, value) = with_idempotency(
        &state,
        &owner,
        "POST /v1/skills/candidates".to_string(),
        &headers,
        &body_value,
        || async {
            let execution_ids =
                body.execution_ids.iter().map(ExecutionId::new).collect();
            let candidate = state
                .bay
                .skills
                .create_candidate(&owner, &body.skill_key, execution_ids, Utc::now())
                .await?;
            Ok((StatusCode::CREATED, json!(candidate)))
        },
    )
    .await?;
    Ok((status, Json(value)))
}

#[derive(Debug, Deserialize)]
pub struct SkillKeyQuery {
    pub skill_key: Option<String>,
}

pub async fn list_candidates(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Query(query): Query<SkillKeyQuery>,
) -> Result<Json<Value>, ApiError> {
    let candidates = state
        .bay
        .skills
        .list_candidates(&owner, query.skill_key.as_deref())
        .await?;
    Ok(Json(json!(candidates)))
}

pub async fn get_candidate(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let candidate = state.bay.skills.get_candidate(&owner, &CandidateId::new(id)).await?;
    Ok(Json(json!(candidate)))
}

#[derive(Debug, Deserialize)]
pub struct EvaluateBody {
    pub passed: bool,
    pub score: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn evaluate(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(body): Json<EvaluateBody>,
) -> Result<Json<Value>, ApiError> {
    let candidate = state
        .bay
        .skills
        .evaluate(&owner, &CandidateId::new(id), body.passed, body.score, body.notes, Utc::now())
        .await?;
    Ok(Json(json!(candidate)))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PromoteBody {
    pub stage: SkillStage,
}

pub async fn promote(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PromoteBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let candidate_id = CandidateId::new(id);
    let body_value = serde_json::to_value(&body)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let scope = format!("POST /v1/skills/candidates/{candidate_id}/promote");
    let (status, value) = with_idempotency(
        &state,
        &owner,
        scope,
        &headers,
        &body_value,
        || async {
            let release = state
                .bay
                .skills
                .promote(&owner, &candidate_id, body.stage, Utc::now())
                .await?;
            Ok((StatusCode::CREATED, json!(release)))
        },
    )
    .await?;
    Ok((status, Json(value)))
}

pub async fn list_releases(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Query(query): Query<SkillKeyQuery>,
) -> Result<Json<Value>, ApiError> {
    let releases = state
        .bay
        .skills
        .list_releases(&owner, query.skill_key.as_deref())
        .await?;
    Ok(Json(json!(releases)))
}

pub async fn rollback(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let restored = state.bay.skills.rollback(&owner, &ReleaseId::new(id)).await?;
    Ok(Json(json!(restored)))
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use bay_domain::{ExecType, ExecutionId, Owner, SandboxId};
use bay_store::{ExecutionFilter, ExecutionRecord, StateStore};
use tracing::debug;

use crate::error::OrchestratorError;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

/// Query parameters for history listings, as they arrive from the API.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub sandbox_id: Option<SandboxId>,
    pub exec_type: Option<ExecType>,
    pub success: Option<bool>,
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Records every semantically weighty capability invocation and serves the
/// history API. Rows are immutable except for their annotations.
pub struct HistoryService {
    store: Arc<dyn StateStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Persist one invocation. Called by the router after the operation
    /// completes, successful or not.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        owner: &Owner,
        sandbox_id: &SandboxId,
        exec_type: ExecType,
        input: String,
        output: Option<String>,
        stdout: Option<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
        success: bool,
        duration_ms: u64,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        let record = ExecutionRecord {
            id: ExecutionId::generate(),
            sandbox_id: sandbox_id.clone(),
            owner: owner.clone(),
            exec_type,
            input,
            output,
            stdout,
            stderr,
            exit_code,
            success,
            duration_ms,
            started_at,
            tags: Vec::new(),
            description: None,
            notes: None,
        };
        self.store.insert_execution(&record).await?;
        debug!(execution_id = %record.id, exec_type = %exec_type, "execution recorded");
        Ok(record)
    }

    pub async fn list(
        &self,
        owner: &Owner,
        query: HistoryQuery,
    ) -> Result<Vec<ExecutionRecord>, OrchestratorError> {
        let filter = ExecutionFilter {
            owner: Some(owner.clone()),
            sandbox_id: query.sandbox_id,
            exec_type: query.exec_type,
            success: query.success,
            tag: query.tag,
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
            offset: query.offset.unwrap_or(0),
        };
        Ok(self.store.list_executions(&filter).await?)
    }

    pub async fn get(
        &self,
        owner: &Owner,
        id: &ExecutionId,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        match self.store.get_execution(id).await? {
            Some(rec) if &rec.owner == owner => Ok(rec),
            _ => Err(OrchestratorError::NotFound(format!("execution '{id}'"))),
        }
    }

    pub async fn last_for_sandbox(
        &self,
        owner: &Owner,
        sandbox_id: &SandboxId,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        match self.store.last_execution(sandbox_id).await? {
            Some(rec) if &rec.owner == owner => Ok(rec),
            _ => Err(OrchestratorError::NotFound(format!(
                "executions for sandbox '{sandbox_id}'"
            ))),
        }
    }

    /// Update annotation fields only.
    pub async fn annotate(
        &self,
        owner: &Owner,
        id: &ExecutionId,
        description: Option<String>,
        tags: Option<Vec<String>>,
        notes: Option<String>,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        // Owner check before the write.
        self.get(owner, id).await?;
        Ok(self.store.annotate_execution(id, description, tags, notes).await?)
    }
}

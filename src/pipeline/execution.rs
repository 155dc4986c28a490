//! Execution records - the append-only per-stage audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionId, PipelineExecutionId, UserId};

/// Outcome of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    Success,
    Failed,
    Skipped,
    LagRetry,
}

/// One per-stage audit row.
///
/// A row is appended in `STARTED` when the stage begins and finalized once.
/// A resumed stage produces a new row linked by `parent_execution_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub service: String,
    pub status: ExecutionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_execution_id: Option<PipelineExecutionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<ExecutionId>,
}

impl ExecutionRecord {
    /// Open a record for a stage invocation.
    pub fn started(service: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            service: service.into(),
            status: ExecutionStatus::Started,
            user_id: None,
            pipeline_execution_id: None,
            test_run_id: None,
            started_at: now,
            ended_at: None,
            error: None,
            outputs: None,
            parent_execution_id: None,
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_pipeline_execution(mut self, id: PipelineExecutionId) -> Self {
        self.pipeline_execution_id = Some(id);
        self
    }

    pub fn with_test_run(mut self, test_run_id: Option<String>) -> Self {
        self.test_run_id = test_run_id;
        self
    }

    pub fn with_parent(mut self, parent: ExecutionId) -> Self {
        self.parent_execution_id = Some(parent);
        self
    }

    /// Close the record with its terminal status.
    pub fn finalize(
        &mut self,
        status: ExecutionStatus,
        error: Option<String>,
        outputs: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.error = error;
        self.outputs = outputs;
        self.ended_at = Some(now);
    }
}

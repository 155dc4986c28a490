//! In-memory store implementation.
//!
//! One `MemoryStore` implements every store contract, so a single `Arc`
//! can back all the service handles. Maps live behind `tokio::sync::RwLock`;
//! every mutation holds the write lock for the whole read-modify-write, which
//! gives the document-level linearizability the contracts assume.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    BlobStore, BlobUri, ExecutionLogStore, LedgerStore, PendingInputStore, PipelineRunStore,
    UserStore,
};
use crate::activity::{Destination, Source};
use crate::ledger::UploadedActivityRecord;
use crate::pending::{PendingInput, PendingInputState};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::execution::{ExecutionRecord, ExecutionStatus};
use crate::pipeline::run::{DestinationStatus, PipelineRun, RunStatus};
use crate::types::{
    Error, ExecutionId, PendingInputId, PipelineExecutionId, PipelineId, Result, UserId,
};
use crate::user::{tier, UserRecord};

/// In-memory backend for every store contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserRecord>>,
    pipelines: RwLock<HashMap<String, Vec<PipelineConfig>>>,
    /// user id → execution id → run
    runs: RwLock<HashMap<String, HashMap<String, PipelineRun>>>,
    /// dedup key → (user id, execution id)
    run_dedup: RwLock<HashMap<String, (String, String)>>,
    executions: RwLock<Vec<ExecutionRecord>>,
    /// (user id, pending id) → pending input
    pending: RwLock<HashMap<(String, String), PendingInput>>,
    /// user id → record id → ledger row
    ledger: RwLock<HashMap<String, HashMap<String, UploadedActivityRecord>>>,
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

// =============================================================================
// UserStore
// =============================================================================

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, user_id: &UserId) -> Result<UserRecord> {
        self.users
            .read()
            .await
            .get(user_id.as_str())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("user {user_id}")))
    }

    async fn put_user(&self, user: UserRecord) -> Result<()> {
        self.users
            .write()
            .await
            .insert(user.user_id.as_str().to_string(), user);
        Ok(())
    }

    async fn increment_sync_count(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<u32> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id.as_str())
            .ok_or_else(|| Error::not_found(format!("user {user_id}")))?;

        if !tier::same_month(user.sync.reset_at, now) {
            user.sync.count_this_month = 0;
            user.sync.reset_at = now;
        }
        user.sync.count_this_month += 1;
        Ok(user.sync.count_this_month)
    }

    async fn enabled_pipelines_for_source(
        &self,
        user_id: &UserId,
        source: Source,
    ) -> Result<Vec<PipelineConfig>> {
        Ok(self
            .pipelines
            .read()
            .await
            .get(user_id.as_str())
            .map(|configs| {
                configs
                    .iter()
                    .filter(|c| c.enabled && c.source == source)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_pipeline(&self, user_id: &UserId, config: PipelineConfig) -> Result<()> {
        let mut pipelines = self.pipelines.write().await;
        let configs = pipelines.entry(user_id.as_str().to_string()).or_default();
        match configs
            .iter_mut()
            .find(|c| c.pipeline_id == config.pipeline_id)
        {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
        Ok(())
    }

    async fn get_pipeline(
        &self,
        user_id: &UserId,
        pipeline_id: &PipelineId,
    ) -> Result<PipelineConfig> {
        self.pipelines
            .read()
            .await
            .get(user_id.as_str())
            .and_then(|configs| configs.iter().find(|c| &c.pipeline_id == pipeline_id))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("pipeline {pipeline_id} for user {user_id}")))
    }
}

// =============================================================================
// PipelineRunStore
// =============================================================================

#[async_trait]
impl PipelineRunStore for MemoryStore {
    async fn create_if_absent(&self, run: PipelineRun) -> Result<PipelineRun> {
        let mut dedup = self.run_dedup.write().await;
        if let Some((user_key, run_key)) = dedup.get(&run.dedup_key) {
            let runs = self.runs.read().await;
            return runs
                .get(user_key)
                .and_then(|m| m.get(run_key))
                .cloned()
                .ok_or_else(|| Error::internal("dedup index points at a missing run"));
        }

        let user_key = run.user_id.as_str().to_string();
        let run_key = run.pipeline_execution_id.to_string();
        dedup.insert(run.dedup_key.clone(), (user_key.clone(), run_key.clone()));

        self.runs
            .write()
            .await
            .entry(user_key)
            .or_default()
            .insert(run_key, run.clone());
        Ok(run)
    }

    async fn get_run(&self, user_id: &UserId, id: &PipelineExecutionId) -> Result<PipelineRun> {
        self.runs
            .read()
            .await
            .get(user_id.as_str())
            .and_then(|m| m.get(&id.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("pipeline run {id}")))
    }

    async fn transition(
        &self,
        user_id: &UserId,
        id: &PipelineExecutionId,
        to: RunStatus,
        reason: Option<String>,
    ) -> Result<PipelineRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(user_id.as_str())
            .and_then(|m| m.get_mut(&id.to_string()))
            .ok_or_else(|| Error::not_found(format!("pipeline run {id}")))?;

        run.transition(to, reason, Utc::now())?;
        Ok(run.clone())
    }

    async fn set_destination_status(
        &self,
        user_id: &UserId,
        id: &PipelineExecutionId,
        destination: Destination,
        status: DestinationStatus,
    ) -> Result<PipelineRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(user_id.as_str())
            .and_then(|m| m.get_mut(&id.to_string()))
            .ok_or_else(|| Error::not_found(format!("pipeline run {id}")))?;

        run.apply_destination(destination, status)?;
        Ok(run.clone())
    }

    async fn set_lag_attempts(
        &self,
        user_id: &UserId,
        id: &PipelineExecutionId,
        attempts: u32,
    ) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(user_id.as_str())
            .and_then(|m| m.get_mut(&id.to_string()))
            .ok_or_else(|| Error::not_found(format!("pipeline run {id}")))?;

        run.lag_attempts = attempts;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<_> = self
            .runs
            .read()
            .await
            .get(user_id.as_str())
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn unsynchronized(&self, user_id: &UserId) -> Result<Vec<PipelineRun>> {
        Ok(self
            .runs
            .read()
            .await
            .get(user_id.as_str())
            .map(|m| {
                m.values()
                    .filter(|run| {
                        matches!(run.status, RunStatus::Failed | RunStatus::Partial)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// =============================================================================
// ExecutionLogStore
// =============================================================================

#[async_trait]
impl ExecutionLogStore for MemoryStore {
    async fn append(&self, record: ExecutionRecord) -> Result<()> {
        self.executions.write().await.push(record);
        Ok(())
    }

    async fn finalize(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
        outputs: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut executions = self.executions.write().await;
        let record = executions
            .iter_mut()
            .find(|r| &r.execution_id == execution_id)
            .ok_or_else(|| Error::not_found(format!("execution {execution_id}")))?;

        record.finalize(status, error, outputs, now);
        Ok(())
    }

    async fn for_pipeline_execution(
        &self,
        id: &PipelineExecutionId,
    ) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .filter(|r| r.pipeline_execution_id.as_ref() == Some(id))
            .cloned()
            .collect())
    }
}

// =============================================================================
// PendingInputStore
// =============================================================================

#[async_trait]
impl PendingInputStore for MemoryStore {
    async fn create(&self, pending: PendingInput) -> Result<()> {
        let key = (
            pending.user_id.as_str().to_string(),
            pending.pending_id.to_string(),
        );
        self.pending.write().await.insert(key, pending);
        Ok(())
    }

    async fn get_pending(&self, user_id: &UserId, id: &PendingInputId) -> Result<PendingInput> {
        self.pending
            .read()
            .await
            .get(&(user_id.as_str().to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("pending input {id}")))
    }

    async fn claim(
        &self,
        user_id: &UserId,
        id: &PendingInputId,
        to: PendingInputState,
        input_data: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<PendingInput> {
        let mut pending = self.pending.write().await;
        let row = pending
            .get_mut(&(user_id.as_str().to_string(), id.to_string()))
            .ok_or_else(|| Error::not_found(format!("pending input {id}")))?;

        if row.state != PendingInputState::Waiting {
            return Err(Error::state_transition(format!(
                "pending input {id} already {:?}",
                row.state
            )));
        }

        row.state = to;
        row.input_data.extend(input_data);
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<PendingInput>> {
        Ok(self
            .pending
            .read()
            .await
            .values()
            .filter(|p| p.state == PendingInputState::Waiting && p.auto_deadline <= now)
            .cloned()
            .collect())
    }

    async fn waiting_for_user(&self, user_id: &UserId) -> Result<Vec<PendingInput>> {
        Ok(self
            .pending
            .read()
            .await
            .values()
            .filter(|p| {
                p.state == PendingInputState::Waiting && p.user_id.as_str() == user_id.as_str()
            })
            .cloned()
            .collect())
    }
}

// =============================================================================
// LedgerStore
// =============================================================================

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn put_record(&self, user_id: &UserId, record: UploadedActivityRecord) -> Result<()> {
        self.ledger
            .write()
            .await
            .entry(user_id.as_str().to_string())
            .or_default()
            .insert(record.record_id.clone(), record);
        Ok(())
    }

    async fn get_record(
        &self,
        user_id: &UserId,
        record_id: &str,
    ) -> Result<Option<UploadedActivityRecord>> {
        Ok(self
            .ledger
            .read()
            .await
            .get(user_id.as_str())
            .and_then(|m| m.get(record_id))
            .cloned())
    }
}

// =============================================================================
// BlobStore
// =============================================================================

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, bucket: &str, object: &str, data: Bytes) -> Result<String> {
        let uri = BlobUri {
            scheme: "mem".to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
        .to_string();

        let mut blobs = self.blobs.write().await;
        // Objects are immutable once written.
        if blobs.contains_key(&uri) {
            return Err(Error::validation(format!("blob already exists: {uri}")));
        }
        blobs.insert(uri.clone(), data);
        Ok(uri)
    }

    async fn get(&self, uri: &str) -> Result<Bytes> {
        BlobUri::parse(uri)?;
        self.blobs
            .read()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("blob {uri}")))
    }
}

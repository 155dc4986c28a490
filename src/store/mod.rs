//! Store contracts.
//!
//! Storage backends are collaborators; the core contracts only their
//! semantics. Documents are linearizable at the document level; the traits
//! expose the conditional-update and atomic-increment primitives the
//! pipeline's invariants depend on. The in-memory implementation doubles as
//! the single-process deployment and the test backend.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::activity::{Destination, Source};
use crate::ledger::UploadedActivityRecord;
use crate::pending::{PendingInput, PendingInputState};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::execution::{ExecutionRecord, ExecutionStatus};
use crate::pipeline::run::{DestinationStatus, PipelineRun, RunStatus};
use crate::types::{
    Error, ExecutionId, PendingInputId, PipelineExecutionId, PipelineId, Result, UserId,
};
use crate::user::UserRecord;

pub mod memory;

pub use memory::MemoryStore;

// =============================================================================
// Users & pipelines
// =============================================================================

/// `users/{userId}` documents plus their `pipelines` subcollection.
#[async_trait]
pub trait UserStore: Send + Sync + fmt::Debug {
    async fn get_user(&self, user_id: &UserId) -> Result<UserRecord>;

    async fn put_user(&self, user: UserRecord) -> Result<()>;

    /// Atomically increment the monthly sync counter, resetting it first
    /// when the stored `reset_at` month differs from `now`. Returns the new
    /// count.
    async fn increment_sync_count(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<u32>;

    /// Enabled pipelines whose source matches, in stored order.
    async fn enabled_pipelines_for_source(
        &self,
        user_id: &UserId,
        source: Source,
    ) -> Result<Vec<PipelineConfig>>;

    async fn put_pipeline(&self, user_id: &UserId, config: PipelineConfig) -> Result<()>;

    async fn get_pipeline(
        &self,
        user_id: &UserId,
        pipeline_id: &PipelineId,
    ) -> Result<PipelineConfig>;
}

// =============================================================================
// Pipeline runs
// =============================================================================

/// `users/{userId}/pipeline_runs` subcollection.
#[async_trait]
pub trait PipelineRunStore: Send + Sync + fmt::Debug {
    /// Conditional create keyed by the run's `dedup_key`. On redelivery the
    /// already-stored run is returned and no duplicate is created.
    async fn create_if_absent(&self, run: PipelineRun) -> Result<PipelineRun>;

    async fn get_run(&self, user_id: &UserId, id: &PipelineExecutionId) -> Result<PipelineRun>;

    /// Guarded aggregate-status transition (see [`PipelineRun::transition`]).
    async fn transition(
        &self,
        user_id: &UserId,
        id: &PipelineExecutionId,
        to: RunStatus,
        reason: Option<String>,
    ) -> Result<PipelineRun>;

    /// Per-destination field update; concurrent uploaders never overwrite
    /// each other's sub-statuses.
    async fn set_destination_status(
        &self,
        user_id: &UserId,
        id: &PipelineExecutionId,
        destination: Destination,
        status: DestinationStatus,
    ) -> Result<PipelineRun>;

    async fn set_lag_attempts(
        &self,
        user_id: &UserId,
        id: &PipelineExecutionId,
        attempts: u32,
    ) -> Result<()>;

    /// All runs for a user, most recent first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PipelineRun>>;

    /// Runs that did not fully succeed - the user-visible failure surface.
    async fn unsynchronized(&self, user_id: &UserId) -> Result<Vec<PipelineRun>>;
}

// =============================================================================
// Execution log
// =============================================================================

/// Append-only per-stage audit rows.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync + fmt::Debug {
    async fn append(&self, record: ExecutionRecord) -> Result<()>;

    /// Close a `STARTED` row with its terminal status.
    async fn finalize(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        error: Option<String>,
        outputs: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn for_pipeline_execution(
        &self,
        id: &PipelineExecutionId,
    ) -> Result<Vec<ExecutionRecord>>;
}

// =============================================================================
// Pending inputs
// =============================================================================

/// `users/{userId}/pending_inputs` subcollection.
#[async_trait]
pub trait PendingInputStore: Send + Sync + fmt::Debug {
    async fn create(&self, pending: PendingInput) -> Result<()>;

    async fn get_pending(&self, user_id: &UserId, id: &PendingInputId) -> Result<PendingInput>;

    /// Conditional `WAITING → to` transition, merging `input_data`. Returns
    /// [`Error::StateTransition`] when the row was already claimed, which is
    /// how a user resolve and the auto-resume driver settle their race.
    async fn claim(
        &self,
        user_id: &UserId,
        id: &PendingInputId,
        to: PendingInputState,
        input_data: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<PendingInput>;

    /// WAITING rows past their auto-resume deadline, across all users.
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<PendingInput>>;

    async fn waiting_for_user(&self, user_id: &UserId) -> Result<Vec<PendingInput>>;
}

// =============================================================================
// Ledger
// =============================================================================

/// `users/{userId}/uploaded_activities` subcollection (loop prevention).
#[async_trait]
pub trait LedgerStore: Send + Sync + fmt::Debug {
    async fn put_record(&self, user_id: &UserId, record: UploadedActivityRecord) -> Result<()>;

    async fn get_record(
        &self,
        user_id: &UserId,
        record_id: &str,
    ) -> Result<Option<UploadedActivityRecord>>;
}

// =============================================================================
// Blobs
// =============================================================================

/// Immutable object storage for oversized payloads.
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Write an object and return its URI.
    async fn put(&self, bucket: &str, object: &str, data: Bytes) -> Result<String>;

    async fn get(&self, uri: &str) -> Result<Bytes>;
}

/// Parsed `<scheme>://<bucket>/<object>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobUri {
    pub scheme: String,
    pub bucket: String,
    pub object: String,
}

impl BlobUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::validation(format!("blob uri missing scheme: {uri}")))?;
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| Error::validation(format!("blob uri missing object: {uri}")))?;
        if scheme.is_empty() || bucket.is_empty() || object.is_empty() {
            return Err(Error::validation(format!("malformed blob uri: {uri}")));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }
}

impl fmt::Display for BlobUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_uri_round_trip() {
        let uri = BlobUri::parse("mem://fitlink-artifacts/pending/abc.json").unwrap();
        assert_eq!(uri.scheme, "mem");
        assert_eq!(uri.bucket, "fitlink-artifacts");
        assert_eq!(uri.object, "pending/abc.json");
        assert_eq!(uri.to_string(), "mem://fitlink-artifacts/pending/abc.json");
    }

    #[test]
    fn test_blob_uri_rejects_malformed() {
        assert!(BlobUri::parse("no-scheme").is_err());
        assert!(BlobUri::parse("mem://bucket-only").is_err());
        assert!(BlobUri::parse("://bucket/object").is_err());
    }
}

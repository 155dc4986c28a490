//! Pipeline run - the per-invocation audit document.
//!
//! One `PipelineRun` exists per `pipeline_execution_id`. Status transitions
//! are monotonic except `AWAITING_INPUT → RUNNING` on resume; per-destination
//! sub-statuses are independent and owned by their uploader.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::activity::{Destination, Source};
use crate::types::{
    ActivityId, Error, PipelineExecutionId, PipelineId, RawMessageId, Result, UserId,
};

// =============================================================================
// Status enums
// =============================================================================

/// Aggregate run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    AwaitingInput,
    Success,
    Partial,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Partial | RunStatus::Failed | RunStatus::Skipped
        )
    }
}

/// Per-destination sub-status state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationState {
    Pending,
    Success,
    Failed,
}

impl DestinationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DestinationState::Pending)
    }
}

/// Per-destination sub-status with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationStatus {
    pub state: DestinationState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl DestinationStatus {
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            state: DestinationState::Pending,
            external_id: None,
            error: None,
            updated_at: now,
        }
    }

    pub fn success(external_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            state: DestinationState::Success,
            external_id: Some(external_id.into()),
            error: None,
            updated_at: now,
        }
    }

    pub fn failed(error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            state: DestinationState::Failed,
            external_id: None,
            error: Some(error.into()),
            updated_at: now,
        }
    }
}

// =============================================================================
// PipelineRun
// =============================================================================

/// One runtime invocation of a pipeline for one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub pipeline_execution_id: PipelineExecutionId,
    pub pipeline_id: PipelineId,
    pub user_id: UserId,
    pub activity_id: ActivityId,
    pub source: Source,

    /// Splitter idempotence key: `"<raw_message_id>:<pipeline_id>"`.
    pub dedup_key: String,

    pub status: RunStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,

    pub destinations: HashMap<Destination, DestinationStatus>,

    /// Mirror of the envelope's lag counter, for the audit trail.
    #[serde(default)]
    pub lag_attempts: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Splitter-owned constructor: one run per fan-out copy.
    pub fn new(
        user_id: UserId,
        activity_id: ActivityId,
        source: Source,
        pipeline_id: PipelineId,
        destinations: &[Destination],
        raw_message_id: &RawMessageId,
        now: DateTime<Utc>,
    ) -> Self {
        let dedup_key = Self::dedup_key(raw_message_id, &pipeline_id);
        Self {
            pipeline_execution_id: PipelineExecutionId::new(),
            pipeline_id,
            user_id,
            activity_id,
            source,
            dedup_key,
            status: RunStatus::Pending,
            status_reason: None,
            destinations: destinations
                .iter()
                .map(|d| (*d, DestinationStatus::pending(now)))
                .collect(),
            lag_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn dedup_key(raw_message_id: &RawMessageId, pipeline_id: &PipelineId) -> String {
        format!("{raw_message_id}:{pipeline_id}")
    }

    /// Apply a guarded status transition.
    ///
    /// Same-state transitions are no-ops (redelivery tolerance). The only
    /// backward edge is `AWAITING_INPUT → RUNNING` on resume.
    pub fn transition(
        &mut self,
        to: RunStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        use RunStatus::*;

        if self.status == to {
            return Ok(());
        }

        let allowed = match self.status {
            Pending => matches!(to, Running | AwaitingInput | Failed | Skipped),
            Running => matches!(to, AwaitingInput | Success | Partial | Failed | Skipped),
            AwaitingInput => matches!(to, Running | Failed | Skipped),
            Success | Partial | Failed | Skipped => false,
        };

        if !allowed {
            return Err(Error::state_transition(format!(
                "pipeline run {}: cannot transition {:?} -> {:?}",
                self.pipeline_execution_id, self.status, to
            )));
        }

        self.status = to;
        self.status_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    /// Record one destination's sub-status. Owned by that destination's
    /// uploader; other destinations are untouched.
    pub fn apply_destination(
        &mut self,
        destination: Destination,
        status: DestinationStatus,
    ) -> Result<()> {
        if !self.destinations.contains_key(&destination) {
            return Err(Error::not_found(format!(
                "run {} has no destination {destination}",
                self.pipeline_execution_id
            )));
        }
        self.updated_at = status.updated_at;
        self.destinations.insert(destination, status);
        self.rollup();
        Ok(())
    }

    /// Fold terminal sub-statuses into the aggregate status once every
    /// destination is terminal. Only fires while the run is `RUNNING` or
    /// already `PARTIAL`; skipped/failed/awaiting runs keep their status.
    fn rollup(&mut self) {
        if !matches!(self.status, RunStatus::Running | RunStatus::Partial) {
            return;
        }
        if self.destinations.is_empty()
            || !self.destinations.values().all(|d| d.state.is_terminal())
        {
            return;
        }

        let successes = self
            .destinations
            .values()
            .filter(|d| d.state == DestinationState::Success)
            .count();

        self.status = if successes == self.destinations.len() {
            RunStatus::Success
        } else if successes == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };
    }

    /// External id recorded for a destination, if that destination has
    /// already succeeded (drives the uploader's create-vs-update decision).
    pub fn successful_external_id(&self, destination: Destination) -> Option<&str> {
        self.destinations.get(&destination).and_then(|d| {
            if d.state == DestinationState::Success {
                d.external_id.as_deref()
            } else {
                None
            }
        })
    }
}

//! Framework wrapper - uniform stage triggering, audit, and error capture.
//!
//! Every stage runs inside [`StageRunner::run`]:
//! - message attributes (user id, test-run id) are extracted up front,
//! - an execution record opens in `STARTED` and is finalized exactly once,
//! - the handler runs under a deadline with cancellation propagation,
//! - failures reach the error sink and are returned to the caller; the bus
//!   delivery only succeeds when the handler does.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::bus::BusMessage;
use crate::pipeline::execution::{ExecutionRecord, ExecutionStatus};
use crate::store::ExecutionLogStore;
use crate::types::{Error, Result};

// =============================================================================
// Outcomes
// =============================================================================

/// What a stage handler reports back. The explicit variants override the
/// wrapper's default success mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Success {
        outputs: Option<serde_json::Value>,
    },
    Skipped {
        reason: String,
    },
    LagRetry {
        delay: Duration,
    },
}

impl StageOutcome {
    pub fn success() -> Self {
        Self::Success { outputs: None }
    }

    pub fn success_with(outputs: serde_json::Value) -> Self {
        Self::Success {
            outputs: Some(outputs),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    fn execution_status(&self) -> ExecutionStatus {
        match self {
            StageOutcome::Success { .. } => ExecutionStatus::Success,
            StageOutcome::Skipped { .. } => ExecutionStatus::Skipped,
            StageOutcome::LagRetry { .. } => ExecutionStatus::LagRetry,
        }
    }
}

// =============================================================================
// Stage contract
// =============================================================================

/// One message-driven pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync + fmt::Debug {
    /// Stable service name recorded on execution rows.
    fn service(&self) -> &str;

    async fn handle(&self, message: &BusMessage, cancel: &CancellationToken)
        -> Result<StageOutcome>;
}

// =============================================================================
// Error sink
// =============================================================================

/// External error-tracking seam; capture must never fail the stage.
pub trait ErrorSink: Send + Sync + fmt::Debug {
    fn capture(&self, service: &str, error: &Error);
}

/// Log-only error sink.
#[derive(Debug, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn capture(&self, service: &str, error: &Error) {
        tracing::error!(service, error = %error, "stage failure captured");
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Uniform wrapper every stage runs inside.
#[derive(Debug, Clone)]
pub struct StageRunner {
    executions: Arc<dyn ExecutionLogStore>,
    errors: Arc<dyn ErrorSink>,
    deadline: Duration,
}

impl StageRunner {
    pub fn new(
        executions: Arc<dyn ExecutionLogStore>,
        errors: Arc<dyn ErrorSink>,
        deadline: Duration,
    ) -> Self {
        Self {
            executions,
            errors,
            deadline,
        }
    }

    /// Run one stage invocation for one message.
    ///
    /// Errors are recorded, captured, and returned; they are never
    /// swallowed.
    pub async fn run(&self, stage: &dyn Stage, message: &BusMessage) -> Result<StageOutcome> {
        let cancel = CancellationToken::new();

        let mut record = ExecutionRecord::started(stage.service(), Utc::now())
            .with_test_run(message.attributes.test_run_id.clone());
        if let Some(user_id) = &message.attributes.user_id {
            record = record.with_user(user_id.clone());
        }
        // Best-effort pipeline-execution correlation; raw messages have none.
        if let Ok(envelope) = message.decode_envelope() {
            if let Some(id) = envelope.pipeline_execution_id {
                record = record.with_pipeline_execution(id);
            }
        }

        let execution_id = record.execution_id.clone();
        self.executions.append(record).await?;

        let outcome = match tokio::time::timeout(self.deadline, stage.handle(message, &cancel))
            .await
        {
            Ok(inner) => inner,
            Err(_) => {
                cancel.cancel();
                Err(Error::cancelled("context_cancelled"))
            }
        };

        match &outcome {
            Ok(outcome_value) => {
                let (error, outputs) = match outcome_value {
                    StageOutcome::Success { outputs } => (None, outputs.clone()),
                    StageOutcome::Skipped { reason } => (Some(reason.clone()), None),
                    StageOutcome::LagRetry { delay } => (
                        None,
                        Some(serde_json::json!({ "retry_after_s": delay.as_secs() })),
                    ),
                };
                self.executions
                    .finalize(
                        &execution_id,
                        outcome_value.execution_status(),
                        error,
                        outputs,
                        Utc::now(),
                    )
                    .await?;
                tracing::debug!(
                    service = stage.service(),
                    outcome = ?outcome_value.execution_status(),
                    "stage finished"
                );
            }
            Err(err) => {
                self.executions
                    .finalize(
                        &execution_id,
                        ExecutionStatus::Failed,
                        Some(err.to_string()),
                        None,
                        Utc::now(),
                    )
                    .await?;
                self.errors.capture(stage.service(), err);
                tracing::warn!(service = stage.service(), error = %err, "stage failed");
            }
        }

        outcome
    }
}

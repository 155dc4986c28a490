//! Pending inputs - pause/resume for activities missing user-supplied data.
//!
//! A provider that cannot finish without the user parks the envelope as a
//! `PendingInput` and halts the run (`AWAITING_INPUT`). Resolution (or the
//! auto-resume driver, once the deadline passes) republishes the original
//! payload to the pipeline topic in resume mode. All state transitions are
//! conditional claims so a user resolve racing the auto-resume driver settles
//! on exactly one republish.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activity::{ActivityEnvelope, ResumeState};
use crate::bus::{BusMessage, MessageBus, Topic};
use crate::enrich::{ProviderServices, ProviderType};
use crate::notify::{NotificationKind, Notifier};
use crate::pipeline::run::RunStatus;
use crate::store::{BlobStore, PendingInputStore, PipelineRunStore};
use crate::types::{
    ActivityId, Error, PendingInputId, PipelineExecutionId, PipelineId, Result, UserId,
};
use crate::user::UserRecord;

// =============================================================================
// Model
// =============================================================================

/// Lifecycle of a pending input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingInputState {
    Waiting,
    Resolved,
    Dismissed,
    AutoPopulated,
}

/// One paused activity awaiting user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInput {
    pub pending_id: PendingInputId,
    pub user_id: UserId,
    pub pipeline_id: PipelineId,
    pub pipeline_execution_id: PipelineExecutionId,

    /// The provider that parked this input; the only one that runs on resume.
    pub enricher_provider_id: ProviderType,

    pub required_fields: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_data: HashMap<String, String>,

    /// Blob pointer to the parked envelope, republished on resume.
    pub original_payload_uri: String,

    /// The running envelope's activity id; resume envelopes must carry it.
    pub linked_activity_id: ActivityId,

    pub auto_deadline: DateTime<Utc>,
    pub state: PendingInputState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Parking (called from providers)
// =============================================================================

/// Park the current envelope as a pending input.
///
/// Writes the envelope to blob storage, creates the `WAITING` row with its
/// auto-resume deadline, and notifies the user. The caller (a provider)
/// returns [`crate::enrich::EnrichmentResult::awaiting`] with the returned id.
pub async fn park(
    services: &ProviderServices,
    envelope: &ActivityEnvelope,
    user: &UserRecord,
    provider_type: ProviderType,
    required_fields: Vec<String>,
) -> Result<PendingInputId> {
    let pipeline_id = envelope
        .pipeline_id
        .clone()
        .ok_or_else(|| Error::internal("cannot park a raw envelope"))?;
    let pipeline_execution_id = envelope
        .pipeline_execution_id
        .clone()
        .ok_or_else(|| Error::internal("cannot park an envelope without an execution id"))?;

    let pending_id = PendingInputId::new();
    let now = Utc::now();

    let payload = serde_json::to_vec(envelope)?;
    let object = format!("pending/{pending_id}.json");
    let uri = services
        .blobs
        .put(&services.artifact_bucket, &object, payload.into())
        .await?;

    let pending = PendingInput {
        pending_id: pending_id.clone(),
        user_id: envelope.user_id.clone(),
        pipeline_id,
        pipeline_execution_id,
        enricher_provider_id: provider_type,
        required_fields: required_fields.clone(),
        input_data: HashMap::new(),
        original_payload_uri: uri,
        linked_activity_id: envelope.activity_id.clone(),
        auto_deadline: now + chrono::Duration::from_std(services.limits.pending_input_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24)),
        state: PendingInputState::Waiting,
        created_at: now,
        updated_at: now,
    };

    services.pending.create(pending).await?;

    let message = format!(
        "Your activity needs more information before it can sync: {}",
        required_fields.join(", ")
    );
    if let Err(err) = services
        .notifier
        .notify(user, NotificationKind::InputRequired, &message)
        .await
    {
        tracing::warn!(user_id = %user.user_id, error = %err, "input notification failed");
    }

    Ok(pending_id)
}

// =============================================================================
// Resume
// =============================================================================

/// Republishes parked activities back onto the pipeline topic.
#[derive(Debug, Clone)]
pub struct Resumer {
    pub pending: Arc<dyn PendingInputStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub runs: Arc<dyn PipelineRunStore>,
    pub bus: Arc<dyn MessageBus>,
}

impl Resumer {
    /// Resolve a pending input with user-supplied data and resume the run.
    pub async fn resolve(
        &self,
        user_id: &UserId,
        pending_id: &PendingInputId,
        input_data: HashMap<String, String>,
    ) -> Result<()> {
        let pending = self
            .pending
            .claim(
                user_id,
                pending_id,
                PendingInputState::Resolved,
                input_data,
                Utc::now(),
            )
            .await?;
        self.republish(&pending, false).await
    }

    /// Dismiss a pending input; the run is skipped, nothing is republished.
    pub async fn dismiss(&self, user_id: &UserId, pending_id: &PendingInputId) -> Result<()> {
        let pending = self
            .pending
            .claim(
                user_id,
                pending_id,
                PendingInputState::Dismissed,
                HashMap::new(),
                Utc::now(),
            )
            .await?;

        self.runs
            .transition(
                user_id,
                &pending.pipeline_execution_id,
                RunStatus::Skipped,
                Some("pending input dismissed".to_string()),
            )
            .await?;
        Ok(())
    }

    /// Rebuild the parked envelope in resume mode and publish it.
    async fn republish(&self, pending: &PendingInput, do_not_retry: bool) -> Result<()> {
        let payload = self.blobs.get(&pending.original_payload_uri).await?;
        let mut envelope: ActivityEnvelope = serde_json::from_slice(&payload)?;

        envelope.activity_id = pending.linked_activity_id.clone();
        envelope.resume = ResumeState {
            is_resume: true,
            resume_pending_input_id: Some(pending.pending_id.clone()),
            resume_only_enrichers: vec![pending.enricher_provider_id],
            use_update_method: true,
            do_not_retry,
        };

        self.bus
            .publish(Topic::Pipeline, BusMessage::envelope(&envelope)?)
            .await
    }
}

// =============================================================================
// Auto-resume driver
// =============================================================================

/// Background driver that resumes pending inputs past their deadline.
///
/// Claim-then-republish: the conditional `WAITING → AUTO_POPULATED` update
/// guarantees each expired input is processed exactly once, even with a user
/// resolve racing the scan.
#[derive(Debug, Clone)]
pub struct AutoResumeDriver {
    pub resumer: Resumer,
    pub scan_interval: std::time::Duration,
}

impl AutoResumeDriver {
    /// Run the scan loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.scan_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.tick(Utc::now()).await {
                        tracing::error!(error = %err, "auto-resume scan failed");
                    }
                }
            }
        }
    }

    /// One scan pass; public for tests and manual triggering.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.resumer.pending.expired(now).await?;
        let mut resumed = 0;

        for pending in expired {
            let claim = self
                .resumer
                .pending
                .claim(
                    &pending.user_id,
                    &pending.pending_id,
                    PendingInputState::AutoPopulated,
                    HashMap::new(),
                    now,
                )
                .await;

            match claim {
                Ok(claimed) => {
                    self.resumer.republish(&claimed, true).await?;
                    resumed += 1;
                }
                // Someone else (user resolve or another scanner) won the claim.
                Err(Error::StateTransition(_)) => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(resumed)
    }
}

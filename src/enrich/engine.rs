//! Enricher engine - sequential chain execution for one envelope.
//!
//! The engine is a pure function of (envelope, user, pipeline, registry)
//! plus the service handles providers use. Per step it decides, in order:
//! resume skip → registry lookup → provider call → lag/terminal handling →
//! merge → halt gate. At most one envelope reaches `topic-enriched`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::activity::description::Description;
use crate::activity::ActivityEnvelope;
use crate::bus::{BusMessage, MessageBus, Topic};
use crate::pipeline::run::RunStatus;
use crate::services::CoreServices;
use crate::stage::{Stage, StageOutcome};
use crate::store::{BlobStore, PendingInputStore, PipelineRunStore, UserStore};
use crate::types::{Error, PipelineExecutionId, Result, UserId};

/// The stage consuming `topic-pipeline` (first delivery, lag redeliveries,
/// and resumes alike).
#[derive(Debug)]
pub struct EnricherEngine {
    services: Arc<CoreServices>,
}

impl EnricherEngine {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }

    async fn set_run_status(
        &self,
        user_id: &UserId,
        execution_id: &PipelineExecutionId,
        to: RunStatus,
        reason: Option<String>,
    ) -> Result<()> {
        self.services
            .runs
            .transition(user_id, execution_id, to, reason)
            .await
            .map(|_| ())
    }

    /// Offload the enriched envelope to blob storage when its description
    /// exceeds the transport ceiling, emitting a stub that carries only the
    /// pointer.
    async fn publish_enriched(&self, envelope: ActivityEnvelope) -> Result<()> {
        let ceiling = self.services.config.limits.description_ceiling_bytes;

        let to_publish = if envelope.description.len() > ceiling {
            let execution_id = envelope
                .pipeline_execution_id
                .clone()
                .ok_or_else(|| Error::internal("enriched envelope without execution id"))?;
            let payload = serde_json::to_vec(&envelope)?;
            // Objects are immutable; a redelivered envelope gets its own.
            let object = format!("enriched/{execution_id}-{}.json", uuid::Uuid::new_v4().simple());
            let uri = self
                .services
                .blobs
                .put(&self.services.config.blob.artifact_bucket, &object, payload.into())
                .await?;

            let mut stub = envelope;
            stub.description = String::new();
            stub.activity_data_uri = Some(uri);
            stub
        } else {
            envelope
        };

        self.services
            .bus
            .publish(Topic::Enriched, BusMessage::envelope(&to_publish)?)
            .await
    }

    /// Schedule a lag redelivery, bumping the attempt counter.
    async fn schedule_lag(
        &self,
        mut envelope: ActivityEnvelope,
        retry_after: std::time::Duration,
    ) -> Result<std::time::Duration> {
        envelope.lag_attempts += 1;

        if let Some(execution_id) = &envelope.pipeline_execution_id {
            self.services
                .runs
                .set_lag_attempts(&envelope.user_id, execution_id, envelope.lag_attempts)
                .await?;
        }

        let delay = if retry_after.is_zero() {
            self.services.config.limits.default_lag
        } else {
            retry_after
        };

        let message = BusMessage::envelope(&envelope)?.with_delay(delay);
        self.services.bus.publish(Topic::Lag, message).await?;
        Ok(delay)
    }
}

#[async_trait]
impl Stage for EnricherEngine {
    fn service(&self) -> &str {
        "enricher"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        _cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        let mut envelope = message.decode_envelope()?;
        let execution_id = envelope
            .pipeline_execution_id
            .clone()
            .ok_or_else(|| Error::validation("enricher message without pipeline execution id"))?;
        let pipeline_id = envelope
            .pipeline_id
            .clone()
            .ok_or_else(|| Error::validation("enricher message without pipeline id"))?;

        // Resume envelopes must carry the activity id their pending input
        // was linked to; fail fast when the resumer did not.
        let resume_input = if envelope.resume.is_resume {
            let pending_id = envelope
                .resume
                .resume_pending_input_id
                .clone()
                .ok_or_else(|| Error::validation("resume envelope without pending input id"))?;
            let pending = self
                .services
                .pending
                .get_pending(&envelope.user_id, &pending_id)
                .await?;
            if pending.linked_activity_id != envelope.activity_id {
                return Err(Error::validation(format!(
                    "resume envelope activity {} does not match pending input link {}",
                    envelope.activity_id, pending.linked_activity_id
                )));
            }
            Some(pending)
        } else {
            None
        };

        let user = self.services.users.get_user(&envelope.user_id).await?;
        let config = self
            .services
            .users
            .get_pipeline(&envelope.user_id, &pipeline_id)
            .await?;

        // Resolve a blob-offloaded payload before running providers.
        if let Some(uri) = envelope.activity_data_uri.take() {
            let payload = self.services.blobs.get(&uri).await?;
            envelope = serde_json::from_slice(&payload)?;
        }

        match self
            .set_run_status(&envelope.user_id, &execution_id, RunStatus::Running, None)
            .await
        {
            Ok(()) => {}
            // A resume can arrive after the run already finished (the user
            // supplied input for an activity that synced without it); the
            // terminal status stays, uploaders switch to update mode.
            Err(Error::StateTransition(_)) if envelope.resume.is_resume => {
                tracing::debug!(%execution_id, "resume against a terminal run");
            }
            Err(err) => return Err(err),
        }

        let do_not_retry = envelope.resume.do_not_retry
            || envelope.lag_attempts >= self.services.config.limits.max_lag_attempts;
        let provider_services = self.services.provider_services();

        let mut composed = Description::parse(&envelope.description);

        for step in &config.steps {
            let provider_type = step.provider_type;

            if envelope.resume.is_resume
                && !envelope.resume.resume_only_enrichers.contains(&provider_type)
            {
                tracing::debug!(provider = %provider_type, "skipping step on resume");
                continue;
            }

            let provider = self.services.enrichers.get(provider_type).ok_or_else(|| {
                Error::internal(format!("no provider registered for {provider_type}"))
            })?;

            let ctx = crate::enrich::EnrichContext {
                envelope: &envelope,
                user: &user,
                inputs: &step.inputs,
                do_not_retry,
                resume_input_data: resume_input.as_ref().map(|p| &p.input_data),
                services: &provider_services,
            };

            let result = match provider.enrich(&ctx).await {
                Ok(result) => result,
                Err(Error::DataLag { retry_after, reason }) if !do_not_retry => {
                    tracing::info!(
                        provider = %provider_type,
                        reason = %reason,
                        "provider lagging; scheduling redelivery"
                    );
                    let delay = self.schedule_lag(envelope, retry_after).await?;
                    return Ok(StageOutcome::LagRetry { delay });
                }
                Err(err) => {
                    self.set_run_status(
                        &envelope.user_id,
                        &execution_id,
                        RunStatus::Failed,
                        Some(format!("{provider_type}: {err}")),
                    )
                    .await?;
                    return Err(err);
                }
            };

            // Merge the contribution.
            if let Some(description) = &result.description {
                composed.contribute(result.section_header.as_deref(), description);
            }
            if let Some(name) = &result.name {
                if !name.is_empty() {
                    envelope.name = name.clone();
                }
            }
            for tag in &result.tags {
                if !envelope.tags.contains(tag) {
                    envelope.tags.push(tag.clone());
                }
            }
            envelope
                .enrichment_metadata
                .extend(result.metadata.clone());

            if result.halt_pipeline {
                let (status, reason) = match &result.pending_input {
                    Some(pending_id) => (
                        RunStatus::AwaitingInput,
                        format!("awaiting input {pending_id}"),
                    ),
                    None => (RunStatus::Skipped, format!("halted by {provider_type}")),
                };
                self.set_run_status(
                    &envelope.user_id,
                    &execution_id,
                    status,
                    Some(reason.clone()),
                )
                .await?;
                return Ok(StageOutcome::skipped(reason));
            }
        }

        envelope.description = composed.render();
        self.publish_enriched(envelope).await?;

        Ok(StageOutcome::success())
    }
}

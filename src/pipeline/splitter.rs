//! Pipeline splitter - raw activity fan-out.
//!
//! One raw envelope expands into one `topic-pipeline` message per matching
//! enabled pipeline, each with its own `PipelineRun`. Run creation is keyed
//! by `(raw_message_id, pipeline_id)`, so a redelivered raw message re-emits
//! the same executions instead of minting duplicates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusMessage, MessageBus, Topic};
use crate::pipeline::run::{PipelineRun, RunStatus};
use crate::services::CoreServices;
use crate::stage::{Stage, StageOutcome};
use crate::store::{PipelineRunStore, UserStore};
use crate::types::{Error, RawMessageId, Result};
use crate::user::TierGate;

/// The stage consuming `topic-raw`.
#[derive(Debug)]
pub struct SplitterStage {
    services: Arc<CoreServices>,
}

impl SplitterStage {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for SplitterStage {
    fn service(&self) -> &str {
        "pipeline-splitter"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        _cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        let mut envelope = message.decode_envelope()?;
        if !envelope.is_raw() {
            return Err(Error::validation(
                "splitter received an envelope that already has a pipeline id",
            ));
        }
        // Older source handlers may omit the message id; dedup still needs one.
        let raw_message_id = envelope
            .raw_message_id
            .get_or_insert_with(RawMessageId::new)
            .clone();

        let user = self.services.users.get_user(&envelope.user_id).await?;
        let pipelines = self
            .services
            .users
            .enabled_pipelines_for_source(&envelope.user_id, envelope.source)
            .await?;

        if pipelines.is_empty() {
            return Ok(StageOutcome::skipped("no_pipeline_for_source"));
        }

        let now = Utc::now();
        let gate = TierGate::can_sync(&user, now);

        let mut emitted = 0usize;
        for config in &pipelines {
            let run = PipelineRun::new(
                envelope.user_id.clone(),
                envelope.activity_id.clone(),
                envelope.source,
                config.pipeline_id.clone(),
                &config.destinations,
                &raw_message_id,
                now,
            );
            let run = self.services.runs.create_if_absent(run).await?;

            if let Err(reason) = &gate {
                // Quota denial leaves an auditable failed run and nothing
                // downstream.
                self.services
                    .runs
                    .transition(
                        &envelope.user_id,
                        &run.pipeline_execution_id,
                        RunStatus::Failed,
                        Some(reason.to_string()),
                    )
                    .await?;
                continue;
            }

            let mut copy = envelope.clone();
            copy.pipeline_id = Some(config.pipeline_id.clone());
            copy.pipeline_execution_id = Some(run.pipeline_execution_id.clone());

            let message = BusMessage::envelope(&copy)?;
            self.services.bus.publish(Topic::Pipeline, message).await?;
            emitted += 1;
        }

        if let Err(reason) = gate {
            return Ok(StageOutcome::skipped(reason.to_string()));
        }

        Ok(StageOutcome::success_with(serde_json::json!({
            "pipelines_matched": pipelines.len(),
            "messages_emitted": emitted,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{
        ActivityEnvelope, ActivityType, Destination, Source, StandardizedActivity,
    };
    use crate::bus::MemoryBus;
    use crate::enrich::EnricherRegistry;
    use crate::notify::LogNotifier;
    use crate::pipeline::config::PipelineConfig;
    use crate::stage::LogErrorSink;
    use crate::store::{MemoryStore, UserStore};
    use crate::types::{CoreConfig, UserId};
    use crate::upload::UploaderRegistry;
    use crate::user::UserRecord;

    struct Harness {
        services: Arc<CoreServices>,
        bus: Arc<MemoryBus>,
        store: Arc<MemoryStore>,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new_shared();
        let bus = MemoryBus::new();
        let services = CoreServices::new(
            CoreConfig::default(),
            bus.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            EnricherRegistry::standard(),
            UploaderRegistry::standard(),
            Arc::new(LogNotifier),
            Arc::new(LogErrorSink),
        );
        Harness {
            services,
            bus,
            store,
        }
    }

    fn user_id() -> UserId {
        UserId::from_string("u1".to_string()).unwrap()
    }

    fn raw_envelope() -> ActivityEnvelope {
        ActivityEnvelope::new(
            Source::Garmin,
            user_id(),
            StandardizedActivity::new(ActivityType::Run),
        )
    }

    async fn seed_user(store: &MemoryStore, pipelines: usize) {
        store.put_user(UserRecord::new(user_id())).await.unwrap();
        for i in 0..pipelines {
            store
                .put_pipeline(
                    &user_id(),
                    PipelineConfig::new(format!("p{i}"), Source::Garmin)
                        .with_destination(Destination::Mock),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_fan_out_one_message_per_pipeline() {
        let h = harness().await;
        seed_user(&h.store, 2).await;
        let mut rx = h.bus.subscribe(Topic::Pipeline).await;

        let stage = SplitterStage::new(h.services.clone());
        let message = BusMessage::envelope(&raw_envelope()).unwrap();
        let outcome = stage
            .handle(&message, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            StageOutcome::success_with(serde_json::json!({
                "pipelines_matched": 2,
                "messages_emitted": 2,
            }))
        );

        for _ in 0..2 {
            let emitted = rx.recv().await.unwrap().decode_envelope().unwrap();
            assert!(emitted.pipeline_id.is_some());
            assert!(emitted.pipeline_execution_id.is_some());
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_matching_pipeline_skips() {
        let h = harness().await;
        seed_user(&h.store, 0).await;
        let mut rx = h.bus.subscribe(Topic::Pipeline).await;

        let stage = SplitterStage::new(h.services.clone());
        let message = BusMessage::envelope(&raw_envelope()).unwrap();
        let outcome = stage
            .handle(&message, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, StageOutcome::skipped("no_pipeline_for_source"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_redelivery_does_not_duplicate_runs() {
        let h = harness().await;
        seed_user(&h.store, 1).await;
        let mut rx = h.bus.subscribe(Topic::Pipeline).await;

        let stage = SplitterStage::new(h.services.clone());
        let message = BusMessage::envelope(&raw_envelope()).unwrap();

        stage.handle(&message, &CancellationToken::new()).await.unwrap();
        stage.handle(&message, &CancellationToken::new()).await.unwrap();

        let first = rx.recv().await.unwrap().decode_envelope().unwrap();
        let second = rx.recv().await.unwrap().decode_envelope().unwrap();
        // Same run, same execution id: the dedup key absorbed the redelivery.
        assert_eq!(first.pipeline_execution_id, second.pipeline_execution_id);
    }

    #[tokio::test]
    async fn test_quota_denial_fails_run_and_emits_nothing() {
        let h = harness().await;
        seed_user(&h.store, 1).await;

        // Exhaust the hobbyist quota.
        let mut user = h.store.get_user(&user_id()).await.unwrap();
        user.sync.count_this_month = 25;
        user.sync.reset_at = Utc::now();
        h.store.put_user(user).await.unwrap();

        let mut rx = h.bus.subscribe(Topic::Pipeline).await;
        let stage = SplitterStage::new(h.services.clone());
        let message = BusMessage::envelope(&raw_envelope()).unwrap();
        let outcome = stage
            .handle(&message, &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            StageOutcome::Skipped { reason } => {
                assert!(reason.contains("monthly sync limit"))
            }
            other => panic!("expected skip, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}

//! Lag scheduler.
//!
//! Retryable data-lag redeliveries arrive here after the bus has honored the
//! `retry_after` delay attribute. The stage feeds the envelope back to the
//! enricher via `topic-pipeline`, flipping `do_not_retry` once the attempt
//! bound is spent so the final pass must succeed or skip.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusMessage, MessageBus, Topic};
use crate::services::CoreServices;
use crate::stage::{Stage, StageOutcome};
use crate::types::Result;

/// The stage consuming `topic-lag`.
#[derive(Debug)]
pub struct LagStage {
    services: Arc<CoreServices>,
}

impl LagStage {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for LagStage {
    fn service(&self) -> &str {
        "lag-scheduler"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        _cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        let mut envelope = message.decode_envelope()?;

        let max_attempts = self.services.config.limits.max_lag_attempts;
        if envelope.lag_attempts >= max_attempts && !envelope.resume.do_not_retry {
            tracing::warn!(
                activity_id = %envelope.activity_id,
                attempts = envelope.lag_attempts,
                "lag attempt bound spent; final delivery"
            );
            envelope.resume.do_not_retry = true;
        }

        self.services
            .bus
            .publish(Topic::Pipeline, BusMessage::envelope(&envelope)?)
            .await?;

        Ok(StageOutcome::success_with(serde_json::json!({
            "lag_attempts": envelope.lag_attempts,
            "do_not_retry": envelope.resume.do_not_retry,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityEnvelope, ActivityType, Source, StandardizedActivity};
    use crate::bus::MemoryBus;
    use crate::enrich::EnricherRegistry;
    use crate::notify::LogNotifier;
    use crate::stage::LogErrorSink;
    use crate::store::MemoryStore;
    use crate::types::{CoreConfig, UserId};
    use crate::upload::UploaderRegistry;

    async fn harness() -> (Arc<CoreServices>, Arc<MemoryBus>) {
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
            store,
            EnricherRegistry::standard(),
            UploaderRegistry::standard(),
            Arc::new(LogNotifier),
            Arc::new(LogErrorSink),
        );
        (services, bus)
    }

    fn envelope(lag_attempts: u32) -> ActivityEnvelope {
        let mut envelope = ActivityEnvelope::new(
            Source::Garmin,
            UserId::from_string("u1".to_string()).unwrap(),
            StandardizedActivity::new(ActivityType::Run),
        );
        envelope.lag_attempts = lag_attempts;
        envelope
    }

    #[tokio::test]
    async fn test_redelivers_to_pipeline_topic() {
        let (services, bus) = harness().await;
        let mut rx = bus.subscribe(Topic::Pipeline).await;

        let stage = LagStage::new(services);
        stage
            .handle(
                &BusMessage::envelope(&envelope(1)).unwrap(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let redelivered = rx.recv().await.unwrap().decode_envelope().unwrap();
        assert_eq!(redelivered.lag_attempts, 1);
        assert!(!redelivered.resume.do_not_retry);
    }

    #[tokio::test]
    async fn test_attempt_bound_forces_final_pass() {
        let (services, bus) = harness().await;
        let max = services.config.limits.max_lag_attempts;
        let mut rx = bus.subscribe(Topic::Pipeline).await;

        let stage = LagStage::new(services);
        stage
            .handle(
                &BusMessage::envelope(&envelope(max)).unwrap(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let redelivered = rx.recv().await.unwrap().decode_envelope().unwrap();
        assert!(redelivered.resume.do_not_retry);
    }
}

//! Destination router - enriched activity fan-out.
//!
//! For each destination named by the envelope's run: stamp the PENDING
//! sub-status with the publish timestamp and emit on `topic-dest-<d>`. The
//! envelope content is not transformed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusMessage, MessageBus, Topic};
use crate::pipeline::run::{DestinationState, DestinationStatus};
use crate::services::CoreServices;
use crate::stage::{Stage, StageOutcome};
use crate::store::PipelineRunStore;
use crate::types::{Error, Result};

/// The stage consuming `topic-enriched`.
#[derive(Debug)]
pub struct RouterStage {
    services: Arc<CoreServices>,
}

impl RouterStage {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for RouterStage {
    fn service(&self) -> &str {
        "destination-router"
    }

    async fn handle(
        &self,
        message: &BusMessage,
        _cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        let envelope = message.decode_envelope()?;
        let execution_id = envelope
            .pipeline_execution_id
            .clone()
            .ok_or_else(|| Error::validation("router message without pipeline execution id"))?;

        let run = self
            .services
            .runs
            .get_run(&envelope.user_id, &execution_id)
            .await?;

        let destinations: Vec<_> = run.destinations.keys().copied().collect();
        let now = Utc::now();

        // Stamp the publish timestamp on not-yet-terminal sub-statuses. A
        // resume in update mode re-routes a run whose destinations already
        // succeeded; those keep their external ids for the uploaders.
        for (destination, status) in &run.destinations {
            if status.state == DestinationState::Pending {
                self.services
                    .runs
                    .set_destination_status(
                        &envelope.user_id,
                        &execution_id,
                        *destination,
                        DestinationStatus::pending(now),
                    )
                    .await?;
            }
        }

        let publishes = destinations.iter().map(|destination| {
            let message = BusMessage::envelope(&envelope);
            let bus = self.services.bus.clone();
            let destination = *destination;
            async move { bus.publish(Topic::Destination(destination), message?).await }
        });
        try_join_all(publishes).await?;

        Ok(StageOutcome::success_with(serde_json::json!({
            "destinations": destinations
                .iter()
                .map(|d| d.slug())
                .collect::<Vec<_>>(),
        })))
    }
}

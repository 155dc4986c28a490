//! Source intake - the narrow front door for webhook adapters.
//!
//! Vendor adapters normalize payloads into an [`ActivityEnvelope`] and hand
//! it here. Intake consults the loop-prevention ledger before publishing to
//! `topic-raw`: an activity we just uploaded to that same vendor is a
//! bounceback and is acknowledged without further work.

use std::sync::Arc;

use crate::activity::ActivityEnvelope;
use crate::bus::{BusMessage, MessageBus, Topic};
use crate::services::CoreServices;
use crate::types::Result;

/// What intake did with an inbound activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeDecision {
    /// Published on `topic-raw`.
    Accepted,
    /// Dropped as a bounceback; nothing published, no run created.
    DroppedLoop,
}

/// Front door for inbound activities.
#[derive(Debug)]
pub struct SourceIntake {
    services: Arc<CoreServices>,
}

impl SourceIntake {
    pub fn new(services: Arc<CoreServices>) -> Self {
        Self { services }
    }

    /// Accept one inbound activity.
    ///
    /// `external_id` is the vendor's id for the activity on its own side,
    /// used for the bounceback lookup; sources that cannot supply one skip
    /// loop detection.
    pub async fn accept(
        &self,
        envelope: ActivityEnvelope,
        external_id: Option<&str>,
    ) -> Result<IntakeDecision> {
        if let Some(external_id) = external_id {
            let ledger = self.services.ledger();
            if ledger
                .is_bounceback(&envelope.user_id, envelope.source, external_id)
                .await
            {
                tracing::info!(
                    user_id = %envelope.user_id,
                    source = %envelope.source,
                    external_id,
                    "dropping bounced-back activity"
                );
                return Ok(IntakeDecision::DroppedLoop);
            }
        }

        self.services
            .bus
            .publish(Topic::Raw, BusMessage::envelope(&envelope)?)
            .await?;
        Ok(IntakeDecision::Accepted)
    }
}

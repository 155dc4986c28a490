//! Message bus contract.
//!
//! Topics are logical names; the transport is vendor-agnostic. Payloads are
//! self-describing JSON documents (the activity envelope); attributes carry
//! routing metadata the wrapper reads without decoding the payload.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityEnvelope, Destination};
use crate::types::{Result, UserId};

pub mod memory;

pub use memory::MemoryBus;

// =============================================================================
// Topics
// =============================================================================

/// Logical pipeline topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Source handlers → splitter.
    Raw,
    /// Splitter → enricher; also the resume topic.
    Pipeline,
    /// Enricher → destination router.
    Enriched,
    /// Delayed redelivery back to the enricher.
    Lag,
    /// Router → one uploader.
    Destination(Destination),
}

impl Topic {
    pub fn name(&self) -> String {
        match self {
            Topic::Raw => "topic-raw".to_string(),
            Topic::Pipeline => "topic-pipeline".to_string(),
            Topic::Enriched => "topic-enriched".to_string(),
            Topic::Lag => "topic-lag".to_string(),
            Topic::Destination(dest) => format!("topic-dest-{}", dest.slug()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Attributes carried next to the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MessageAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    /// Test-run correlation id, threaded through execution records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,

    /// Redelivery delay honored by the bus (lag topic).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub delay: Option<Duration>,
}

/// One bus message: attributes plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(default)]
    pub attributes: MessageAttributes,
    pub payload: serde_json::Value,
}

impl BusMessage {
    /// Wrap an activity envelope, stamping the user id attribute.
    pub fn envelope(envelope: &ActivityEnvelope) -> Result<Self> {
        Ok(Self {
            attributes: MessageAttributes {
                user_id: Some(envelope.user_id.clone()),
                test_run_id: None,
                delay: None,
            },
            payload: serde_json::to_value(envelope)?,
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.attributes.delay = Some(delay);
        self
    }

    pub fn with_test_run_id(mut self, test_run_id: impl Into<String>) -> Self {
        self.attributes.test_run_id = Some(test_run_id.into());
        self
    }

    /// Decode the payload back into an envelope.
    pub fn decode_envelope(&self) -> Result<ActivityEnvelope> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

// =============================================================================
// Bus contract
// =============================================================================

/// Message bus contract. Publishing succeeds only once the transport has
/// accepted the message; handler-side failures are the consumer's concern.
#[async_trait]
pub trait MessageBus: Send + Sync + fmt::Debug {
    async fn publish(&self, topic: Topic, message: BusMessage) -> Result<()>;
}

/// Bus decorator that logs instead of emitting (`ENABLE_PUBLISH=false`).
#[derive(Debug)]
pub struct LogOnlyBus;

#[async_trait]
impl MessageBus for LogOnlyBus {
    async fn publish(&self, topic: Topic, message: BusMessage) -> Result<()> {
        tracing::info!(
            topic = %topic,
            user_id = ?message.attributes.user_id,
            "publish disabled; dropping message"
        );
        Ok(())
    }
}

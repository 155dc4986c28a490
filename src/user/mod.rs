//! User records: identity, integrations, tier, sync counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::activity::Destination;
use crate::types::UserId;

pub mod tier;

pub use tier::{effective_tier, Tier, TierGate, TierLimits};

/// Per-month sync accounting.
///
/// `count_this_month` is only meaningful relative to `reset_at`: a reader
/// must treat the counter as zero when `reset_at` falls in an earlier
/// calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCounters {
    pub count_this_month: u32,
    pub reset_at: DateTime<Utc>,
}

impl Default for SyncCounters {
    fn default() -> Self {
        Self {
            count_this_month: 0,
            reset_at: Utc::now(),
        }
    }
}

/// One outbound integration owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub destination: Destination,
    pub enabled: bool,

    /// Opaque vendor credentials (token, base URL, ...). Secret material is
    /// referenced, never logged.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub credentials: HashMap<String, String>,
}

impl Integration {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            enabled: true,
            credentials: HashMap::new(),
        }
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }
}

/// Physical profile feeding enrichment math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_heart_rate_bpm: Option<u16>,
}

/// A Fitlink user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,

    #[serde(default)]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default)]
    pub tier: Tier,

    #[serde(default)]
    pub is_admin: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub sync: SyncCounters,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub integrations: HashMap<Destination, Integration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fcm_tokens: Vec<String>,

    #[serde(default)]
    pub profile: UserProfile,
}

impl UserRecord {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: String::new(),
            email: None,
            tier: Tier::default(),
            is_admin: false,
            trial_ends_at: None,
            sync: SyncCounters::default(),
            integrations: HashMap::new(),
            fcm_tokens: Vec::new(),
            profile: UserProfile::default(),
        }
    }

    /// The user's integration for a destination, when configured.
    pub fn integration(&self, destination: Destination) -> Option<&Integration> {
        self.integrations.get(&destination)
    }

    pub fn add_integration(&mut self, integration: Integration) {
        self.integrations
            .insert(integration.destination, integration);
    }

    /// Count of enabled connections, consulted by the tier gate.
    pub fn enabled_connection_count(&self) -> u32 {
        self.integrations.values().filter(|i| i.enabled).count() as u32
    }
}

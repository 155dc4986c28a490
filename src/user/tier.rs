//! Tier and quota gating.
//!
//! Applied at the splitter (before any fan-out work) and on every uploader
//! sync-count increment. Limits are per calendar month; the counter resets on
//! the first sync of a new month.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Error, Result};
use crate::user::{SyncCounters, UserRecord};

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Hobbyist,
    Athlete,
}

/// Limits applied to a tier. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub monthly_syncs: Option<u32>,
    pub max_connections: Option<u32>,
}

impl Tier {
    pub fn limits(self) -> TierLimits {
        match self {
            Tier::Hobbyist => TierLimits {
                monthly_syncs: Some(25),
                max_connections: Some(2),
            },
            Tier::Athlete => TierLimits {
                monthly_syncs: None,
                max_connections: None,
            },
        }
    }
}

/// Resolve the tier that actually applies to a user right now.
///
/// Admins and users on an active trial get Athlete regardless of the stored
/// tier.
pub fn effective_tier(user: &UserRecord, now: DateTime<Utc>) -> Tier {
    if user.is_admin {
        return Tier::Athlete;
    }
    if let Some(trial_ends_at) = user.trial_ends_at {
        if trial_ends_at > now {
            return Tier::Athlete;
        }
    }
    user.tier
}

/// True when both timestamps fall in the same calendar month.
pub fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// The counter value a reader must use: zero when the last reset happened in
/// an earlier month.
pub fn effective_sync_count(sync: &SyncCounters, now: DateTime<Utc>) -> u32 {
    if same_month(sync.reset_at, now) {
        sync.count_this_month
    } else {
        0
    }
}

/// Tier gate - quota decisions with human-readable denial reasons.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierGate;

impl TierGate {
    /// Whether one more sync is permitted this month.
    pub fn can_sync(user: &UserRecord, now: DateTime<Utc>) -> Result<()> {
        let tier = effective_tier(user, now);
        let Some(limit) = tier.limits().monthly_syncs else {
            return Ok(());
        };

        let used = effective_sync_count(&user.sync, now);
        if used >= limit {
            return Err(Error::quota_exceeded(format!(
                "monthly sync limit of {limit} reached; upgrade to Athlete for unlimited syncs"
            )));
        }
        Ok(())
    }

    /// Whether a new integration may be created.
    pub fn can_add_connection(
        user: &UserRecord,
        current_count: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tier = effective_tier(user, now);
        let Some(limit) = tier.limits().max_connections else {
            return Ok(());
        };

        if current_count >= limit {
            return Err(Error::quota_exceeded(format!(
                "connection limit of {limit} reached; upgrade to Athlete for more integrations"
            )));
        }
        Ok(())
    }
}

//! Loop-prevention ledger.
//!
//! After every successful upload the uploader records
//! `{destination, destination_id}` under the user. Source handlers consult
//! the ledger before publishing: a webhook for an activity we just uploaded
//! to that same vendor is a bounceback and must be dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{Destination, Source};
use crate::store::LedgerStore;
use crate::types::{Result, UserId};

/// One ledger row, written only after a successful vendor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedActivityRecord {
    /// `"<destination>:<destination_id>"`, lowercase destination slug.
    pub record_id: String,

    /// Where the activity originally came from.
    pub source: Source,

    /// The vendor's id for the uploaded activity.
    pub external_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    pub uploaded_at: DateTime<Utc>,
}

impl UploadedActivityRecord {
    /// Canonical ledger key.
    pub fn key(destination: Destination, destination_id: &str) -> String {
        format!("{}:{destination_id}", destination.slug())
    }

    pub fn new(
        destination: Destination,
        destination_id: impl Into<String>,
        source: Source,
        start_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let external_id = destination_id.into();
        Self {
            record_id: Self::key(destination, &external_id),
            source,
            external_id,
            start_time,
            uploaded_at: now,
        }
    }
}

/// Loop-prevention queries and writes over the ledger store.
#[derive(Debug, Clone)]
pub struct LoopLedger {
    store: Arc<dyn LedgerStore>,
}

impl LoopLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Record a successful upload. Must complete before the run's
    /// sub-status flips to SUCCESS.
    pub async fn record_upload(
        &self,
        user_id: &UserId,
        destination: Destination,
        destination_id: &str,
        source: Source,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let record =
            UploadedActivityRecord::new(destination, destination_id, source, start_time, Utc::now());
        self.store.put_record(user_id, record).await
    }

    /// Whether an inbound activity is one we just uploaded to that vendor.
    ///
    /// Fail-open: a store error logs a warning and reports "not a
    /// bounceback" - a rare duplicate beats dropping a user's real activity.
    pub async fn is_bounceback(
        &self,
        user_id: &UserId,
        source: Source,
        external_id: &str,
    ) -> bool {
        let Some(destination) = source.as_destination() else {
            return false;
        };

        let key = UploadedActivityRecord::key(destination, external_id);
        match self.store.get_record(user_id, &key).await {
            Ok(record) => record.is_some(),
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    source = %source,
                    external_id,
                    error = %err,
                    "ledger lookup failed; treating as not a bounceback"
                );
                false
            }
        }
    }
}

//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Variants
//! correspond to the pipeline's error taxonomy: only `DataLag` is retried by
//! the core (via the lag topic); everything else is terminal for the stage
//! that raised it.

use std::time::Duration;

use thiserror::Error;

/// Maximum number of bytes of a vendor response body kept in an error.
const VENDOR_BODY_LIMIT: usize = 512;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the Fitlink pipeline core.
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream vendor has not made the requested data available yet.
    /// The enricher engine reschedules the envelope via the lag topic.
    #[error("data lag: {reason} (retry after {retry_after:?})")]
    DataLag {
        retry_after: Duration,
        reason: String,
    },

    /// Missing or disabled user integration; user-actionable.
    #[error("user configuration error: {0}")]
    UserConfig(String),

    /// HTTP >= 400 from a destination or enrichment-time vendor call.
    /// The body is truncated at construction.
    #[error("vendor api error (status {status}): {body}")]
    VendorApi { status: u16, body: String },

    /// Activity bounced back from a destination that is also a source.
    #[error("loop detected: {0}")]
    LoopDetected(String),

    /// Pipeline intentionally produced no downstream work.
    #[error("skipped: {0}")]
    Skipped(String),

    /// Tier or quota limit reached.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Validation errors (malformed envelope, bad provider inputs).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (user, run, pending input, blob).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid run or pending-input state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Cancellation/deadline exceeded.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Internal errors (bugs, store timeouts).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport errors (connection-level, not vendor status codes).
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn data_lag(retry_after: Duration, reason: impl Into<String>) -> Self {
        Self::DataLag {
            retry_after,
            reason: reason.into(),
        }
    }

    pub fn user_config(msg: impl Into<String>) -> Self {
        Self::UserConfig(msg.into())
    }

    /// Build a vendor error, truncating the body so store rows and logs
    /// stay bounded.
    pub fn vendor_api(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > VENDOR_BODY_LIMIT {
            let mut cut = VENDOR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("...");
        }
        Self::VendorApi { status, body }
    }

    pub fn loop_detected(msg: impl Into<String>) -> Self {
        Self::LoopDetected(msg.into())
    }

    pub fn skipped(msg: impl Into<String>) -> Self {
        Self::Skipped(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl Error {
    /// True only for the lag kind; nothing else is retried by the core.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DataLag { .. })
    }

    /// Requested redelivery delay for lag errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::DataLag { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

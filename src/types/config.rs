//! Configuration structures.
//!
//! Configuration is loaded from environment variables with serde-able
//! defaults, so a test can construct a `CoreConfig` literal and a deployment
//! can ship one as JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global pipeline-core configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Message publishing configuration.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Blob storage configuration.
    #[serde(default)]
    pub blob: BlobConfig,

    /// Pipeline behavior limits.
    #[serde(default)]
    pub limits: PipelineLimits,

    /// Tenant/project identifier, used only for environment detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl CoreConfig {
    /// Build configuration from the process environment.
    ///
    /// Recognized variables: `LOG_LEVEL`, `ENABLE_PUBLISH`,
    /// `ARTIFACT_BUCKET`, `PROJECT_ID`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if !level.is_empty() {
                config.observability.log_level = level;
            }
        }
        if let Ok(enable) = std::env::var("ENABLE_PUBLISH") {
            config.publish.enable_publish = !matches!(
                enable.to_ascii_lowercase().as_str(),
                "false" | "0" | "no"
            );
        }
        if let Ok(bucket) = std::env::var("ARTIFACT_BUCKET") {
            if !bucket.is_empty() {
                config.blob.artifact_bucket = bucket;
            }
        }
        if let Ok(project) = std::env::var("PROJECT_ID") {
            if !project.is_empty() {
                config.project_id = Some(project);
            }
        }

        config
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Message publishing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// When false, publishes are logged instead of emitted.
    pub enable_publish: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enable_publish: true,
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Default bucket for oversized payload offloads.
    pub artifact_bucket: String,

    /// URI scheme used for offloaded objects.
    pub scheme: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            artifact_bucket: "fitlink-artifacts".to_string(),
            scheme: "mem".to_string(),
        }
    }
}

/// Pipeline behavior limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLimits {
    /// Maximum lag redeliveries per envelope before the final
    /// `do_not_retry` pass.
    pub max_lag_attempts: u32,

    /// Description size above which the enriched envelope is offloaded to
    /// blob storage (transport message ceiling).
    pub description_ceiling_bytes: usize,

    /// Fallback redelivery delay when a lag error carries none.
    #[serde(with = "humantime_serde")]
    pub default_lag: Duration,

    /// How often the auto-resume driver scans for expired pending inputs.
    #[serde(with = "humantime_serde")]
    pub auto_resume_scan_interval: Duration,

    /// Default deadline granted to a pending input before auto-resume.
    #[serde(with = "humantime_serde")]
    pub pending_input_ttl: Duration,

    /// Per-stage processing deadline.
    #[serde(with = "humantime_serde")]
    pub stage_deadline: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_lag_attempts: 5,
            description_ceiling_bytes: 9_000,
            default_lag: Duration::from_secs(60),
            auto_resume_scan_interval: Duration::from_secs(300),
            pending_input_ttl: Duration::from_secs(24 * 3600),
            stage_deadline: Duration::from_secs(120),
        }
    }
}

//! Activity envelope - the unit that flows through the pipeline.
//!
//! The envelope carries the normalized activity payload plus everything a
//! stage needs to act without further lookups: identity, enrichment output,
//! blob pointers for oversized payloads, and resume-mode flags.
//!
//! Fields are organized into semantic groups:
//! - **Identity**: source/user/activity/pipeline-execution ids
//! - **Standardized**: normalized payload (sessions → laps → records)
//! - **Enrichment**: name, description, tags, metadata owned by the enricher
//! - **Payload pointers**: blob URIs and the inline FIT alternative
//! - **Resume**: pause/resume and lag bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::enrich::ProviderType;
use crate::types::{ActivityId, PendingInputId, PipelineExecutionId, PipelineId, RawMessageId, UserId};

pub mod description;

pub use description::Description;

// =============================================================================
// Source / Destination
// =============================================================================

/// Inbound integration kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Hevy,
    Garmin,
    Zwift,
    FitFile,
    Manual,
}

impl Source {
    /// The destination this source is symmetric with, when one exists.
    /// Asymmetric sources (file uploads, manual entry) have none and can
    /// never bounce back.
    pub fn as_destination(self) -> Option<Destination> {
        match self {
            Source::Hevy => Some(Destination::Hevy),
            Source::Garmin | Source::Zwift | Source::FitFile | Source::Manual => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Hevy => "hevy",
            Source::Garmin => "garmin",
            Source::Zwift => "zwift",
            Source::FitFile => "fit_file",
            Source::Manual => "manual",
        })
    }
}

/// Outbound integration kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Hevy,
    Strava,
    Mock,
    Webhook,
}

impl Destination {
    /// Lowercase slug used in ledger keys and topic names.
    pub fn slug(self) -> &'static str {
        match self {
            Destination::Hevy => "hevy",
            Destination::Strava => "strava",
            Destination::Mock => "mock",
            Destination::Webhook => "webhook",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

// =============================================================================
// Standardized activity payload
// =============================================================================

/// Normalized activity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Run,
    Ride,
    Swim,
    Walk,
    Hike,
    StrengthTraining,
    Workout,
    Other,
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActivityType::Run => "RUN",
            ActivityType::Ride => "RIDE",
            ActivityType::Swim => "SWIM",
            ActivityType::Walk => "WALK",
            ActivityType::Hike => "HIKE",
            ActivityType::StrengthTraining => "STRENGTH_TRAINING",
            ActivityType::Workout => "WORKOUT",
            ActivityType::Other => "OTHER",
        })
    }
}

/// One sensor sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Record {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate_bpm: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadence_rpm: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_w: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude_deg: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude_deg: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

/// One lap within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Lap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub total_elapsed_time_s: f64,

    #[serde(default)]
    pub total_distance_m: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<Record>,
}

/// One recorded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Session {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub total_elapsed_time_s: f64,

    #[serde(default)]
    pub total_distance_m: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_calories_kcal: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate_bpm: Option<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub laps: Vec<Lap>,
}

/// One strength-training set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StrengthSet {
    pub exercise: String,

    #[serde(default)]
    pub reps: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

/// Structured-workout interval metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IntervalsMeta {
    #[serde(default)]
    pub interval_count: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_duration_s: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_duration_s: Option<f64>,
}

/// One step of a planned workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkoutStep {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Planned workout attached to the activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkoutDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<WorkoutStep>,
}

/// The normalized activity payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedActivity {
    pub activity_type: ActivityType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<Session>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strength_sets: Vec<StrengthSet>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervals: Option<IntervalsMeta>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workout: Option<WorkoutDefinition>,
}

impl StandardizedActivity {
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            start_time: None,
            sessions: Vec::new(),
            strength_sets: Vec::new(),
            intervals: None,
            workout: None,
        }
    }

    /// Total elapsed time across sessions, in seconds.
    pub fn total_elapsed_time_s(&self) -> f64 {
        self.sessions.iter().map(|s| s.total_elapsed_time_s).sum()
    }

    /// Total distance across sessions, in meters.
    pub fn total_distance_m(&self) -> f64 {
        self.sessions.iter().map(|s| s.total_distance_m).sum()
    }
}

// =============================================================================
// Resume state
// =============================================================================

/// Pause/resume flags carried on the envelope, so the enricher stays a pure
/// function of (envelope, user, pipeline, registry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResumeState {
    #[serde(default)]
    pub is_resume: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_pending_input_id: Option<PendingInputId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resume_only_enrichers: Vec<ProviderType>,

    #[serde(default)]
    pub use_update_method: bool,

    /// Final-pass marker: providers must succeed or skip, never lag again.
    /// Set by the auto-resume driver and by the lag scheduler once the
    /// attempt bound is spent.
    #[serde(default)]
    pub do_not_retry: bool,
}

// =============================================================================
// Envelope
// =============================================================================

/// The unit that flows through the pipeline.
///
/// An envelope on `topic-raw` has no `pipeline_id`; the splitter mints the
/// `pipeline_execution_id` and stamps exactly one `pipeline_id` per emitted
/// copy. Unknown fields are ignored on decode for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEnvelope {
    // Identity
    pub source: Source,
    pub user_id: UserId,
    pub activity_id: ActivityId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_execution_id: Option<PipelineExecutionId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<PipelineId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_message_id: Option<RawMessageId>,

    // Payload
    pub standardized: StandardizedActivity,

    // Enrichment output (owned by the enricher engine)
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub enrichment_metadata: HashMap<String, String>,

    // Blob pointers for payloads too large to inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_payload_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_file_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_data_uri: Option<String>,

    /// Inline FIT payload alternative for small files (base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_file_base64: Option<String>,

    // Resume-mode flags
    #[serde(default)]
    pub resume: ResumeState,

    /// Lag redeliveries consumed so far.
    #[serde(default)]
    pub lag_attempts: u32,
}

impl ActivityEnvelope {
    /// Create a raw envelope as a source handler would publish it.
    pub fn new(source: Source, user_id: UserId, standardized: StandardizedActivity) -> Self {
        Self {
            source,
            user_id,
            activity_id: ActivityId::new(),
            pipeline_execution_id: None,
            pipeline_id: None,
            raw_message_id: Some(RawMessageId::new()),
            standardized,
            name: String::new(),
            description: String::new(),
            tags: Vec::new(),
            enrichment_metadata: HashMap::new(),
            original_payload_uri: None,
            fit_file_uri: None,
            activity_data_uri: None,
            fit_file_base64: None,
            resume: ResumeState::default(),
            lag_attempts: 0,
        }
    }

    /// Whether this envelope is still raw (pre-splitter).
    pub fn is_raw(&self) -> bool {
        self.pipeline_id.is_none()
    }

    /// Decode the inline FIT payload, when present.
    pub fn fit_file_bytes(&self) -> crate::types::Result<Option<Vec<u8>>> {
        use base64::Engine as _;

        match &self.fit_file_base64 {
            None => Ok(None),
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| crate::types::Error::validation(format!("invalid fit payload: {e}"))),
        }
    }

    /// Attach an inline FIT payload.
    pub fn set_fit_file_bytes(&mut self, bytes: &[u8]) {
        use base64::Engine as _;
        self.fit_file_base64 = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
    }
}

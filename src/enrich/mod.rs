//! Enricher provider contract and registry.
//!
//! Providers are discovered by a stable type identifier from an explicit
//! registration list built at startup; dispatch is a map lookup. A provider
//! contributes name/description/tags/metadata or gates the pipeline; the
//! engine owns composition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityEnvelope;
use crate::notify::Notifier;
use crate::store::{BlobStore, PendingInputStore};
use crate::types::config::PipelineLimits;
use crate::types::{PendingInputId, Result};
use crate::user::UserRecord;

pub mod engine;
pub mod providers;

pub use engine::EnricherEngine;

// =============================================================================
// Provider identity
// =============================================================================

/// Stable enricher type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Calories,
    LogicGate,
    Branding,
    CustomTitle,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderType::Calories => "calories",
            ProviderType::LogicGate => "logic_gate",
            ProviderType::Branding => "branding",
            ProviderType::CustomTitle => "custom_title",
        })
    }
}

// =============================================================================
// Provider contract
// =============================================================================

/// Service handles a provider may use (pending-input parking, blob access,
/// user notification).
#[derive(Debug, Clone)]
pub struct ProviderServices {
    pub pending: Arc<dyn PendingInputStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub limits: PipelineLimits,
    pub artifact_bucket: String,
    pub blob_scheme: String,
}

/// Everything a provider sees for one step invocation.
#[derive(Debug)]
pub struct EnrichContext<'a> {
    pub envelope: &'a ActivityEnvelope,
    pub user: &'a UserRecord,

    /// UI-driven step configuration (`string → string`; parse with typed
    /// accessors inside the provider).
    pub inputs: &'a HashMap<String, String>,

    /// Set on the final lag pass: the provider must succeed or skip, never
    /// return another lag error.
    pub do_not_retry: bool,

    /// Input data from the pending input being resumed, when this provider
    /// is the resume target.
    pub resume_input_data: Option<&'a HashMap<String, String>>,

    pub services: &'a ProviderServices,
}

impl EnrichContext<'_> {
    /// A step input, resume data taking precedence over static config.
    pub fn input(&self, key: &str) -> Option<&str> {
        self.resume_input_data
            .and_then(|data| data.get(key))
            .or_else(|| self.inputs.get(key))
            .map(String::as_str)
    }
}

/// The contribution of one enricher step.
///
/// `name` and `description` are this step's contribution, not the cumulative
/// value; the engine composes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrichmentResult {
    pub name: Option<String>,
    pub description: Option<String>,

    /// Declares that this step's description replaces any prior section
    /// carrying this header; absent means append.
    pub section_header: Option<String>,

    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,

    /// Stop the chain and drop the activity (run becomes SKIPPED, or
    /// AWAITING_INPUT when `pending_input` is set).
    pub halt_pipeline: bool,

    /// The pending input this provider parked, when it paused the run.
    pub pending_input: Option<PendingInputId>,
}

impl EnrichmentResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn halt() -> Self {
        Self {
            halt_pipeline: true,
            ..Self::default()
        }
    }

    /// Halt while waiting on the given pending input.
    pub fn awaiting(pending_input: PendingInputId) -> Self {
        Self {
            halt_pipeline: true,
            pending_input: Some(pending_input),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_section(
        mut self,
        header: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.section_header = Some(header.into());
        self.description = Some(description.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Enricher provider contract.
#[async_trait]
pub trait EnricherProvider: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn provider_type(&self) -> ProviderType;
    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichmentResult>;
}

// =============================================================================
// Registry
// =============================================================================

/// Explicit provider registration list, built once at startup and read-only
/// thereafter.
#[derive(Debug, Default)]
pub struct EnricherRegistry {
    providers: HashMap<ProviderType, Arc<dyn EnricherProvider>>,
}

impl EnricherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all shipped providers.
    pub fn standard() -> Self {
        Self::new()
            .with_provider(Arc::new(providers::CaloriesProvider))
            .with_provider(Arc::new(providers::LogicGateProvider))
            .with_provider(Arc::new(providers::BrandingProvider))
            .with_provider(Arc::new(providers::CustomTitleProvider))
    }

    /// Register a provider; the last registration for a type wins.
    pub fn with_provider(mut self, provider: Arc<dyn EnricherProvider>) -> Self {
        self.providers.insert(provider.provider_type(), provider);
        self
    }

    pub fn get(&self, provider_type: ProviderType) -> Option<Arc<dyn EnricherProvider>> {
        self.providers.get(&provider_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

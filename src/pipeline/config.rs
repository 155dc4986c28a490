//! User pipeline configuration.
//!
//! A pipeline is a user's declared chain `source → [enrichers] → destinations`.
//! The splitter matches raw activities against enabled pipelines by source.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::activity::{Destination, Source};
use crate::enrich::ProviderType;
use crate::types::PipelineId;

/// One enricher step in a pipeline.
///
/// `inputs` is `string → string` by design: values come straight from
/// UI-driven configuration. Providers parse them with typed accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub provider_type: ProviderType,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, String>,
}

impl PipelineStep {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            inputs: HashMap::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }
}

/// A user's pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_id: PipelineId,
    pub name: String,
    pub source: Source,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Enricher chain, executed in declared order. May be empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<PipelineStep>,

    /// Non-empty for an enabled pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<Destination>,
}

fn default_enabled() -> bool {
    true
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, source: Source) -> Self {
        Self {
            pipeline_id: PipelineId::new(),
            name: name.into(),
            source,
            enabled: true,
            steps: Vec::new(),
            destinations: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Validate pipeline configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("pipeline name is required".to_string());
        }
        if self.enabled && self.destinations.is_empty() {
            return Err("an enabled pipeline must have at least one destination".to_string());
        }
        Ok(())
    }
}

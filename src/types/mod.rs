//! Core shared types: errors, identifiers, configuration.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::CoreConfig;
pub use errors::{Error, Result};
pub use ids::{
    ActivityId, ExecutionId, PendingInputId, PipelineExecutionId, PipelineId, RawMessageId,
    UserId,
};

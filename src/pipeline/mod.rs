//! Pipeline orchestration: configuration, runs, audit, and the fan-out
//! stages (splitter, router) plus the worker runtime that wires every stage
//! to its topic.

pub mod config;
pub mod execution;
pub mod router;
pub mod run;
pub mod runtime;
pub mod splitter;

pub use config::{PipelineConfig, PipelineStep};
pub use execution::{ExecutionRecord, ExecutionStatus};
pub use router::RouterStage;
pub use run::{DestinationState, DestinationStatus, PipelineRun, RunStatus};
pub use runtime::PipelineRuntime;
pub use splitter::SplitterStage;

//! # Fitlink Core - Activity Pipeline Orchestration Runtime
//!
//! Rust implementation of the Fitlink pipeline core providing:
//! - Fan-in / fan-out activity pipeline orchestration (at-least-once)
//! - Sequential enricher composition with retryable lag and halt gating
//! - Pause/resume on missing user input (pending inputs with auto-resume)
//! - Loop prevention across bidirectional integrations
//! - Per-run audit trails and tier/quota gating
//!
//! ## Architecture
//!
//! Five message-driven stages, each a pool of independent workers:
//! ```text
//!  Source Intake   → topic-raw      → Splitter  → topic-pipeline (N copies)
//!  Splitter        → topic-pipeline → Enricher  → topic-enriched / topic-lag
//!  Enricher        → topic-enriched → Router    → topic-dest-<vendor>
//!  Router          → topic-dest-X   → Uploader  → vendor API + ledger write
//!  Lag Scheduler   → topic-lag      → Enricher (delayed redelivery)
//! ```
//!
//! All mutable state lives behind store contracts; every stage receives the
//! same immutable [`services::CoreServices`] bundle constructed at startup.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod activity;
pub mod bus;
pub mod enrich;
pub mod lag;
pub mod ledger;
pub mod notify;
pub mod pending;
pub mod pipeline;
pub mod services;
pub mod source;
pub mod stage;
pub mod store;
pub mod types;
pub mod upload;
pub mod user;

// Internal utilities
pub mod observability;

pub use services::CoreServices;
pub use types::{CoreConfig, Error, Result};

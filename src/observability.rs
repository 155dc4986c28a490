//! Observability utilities.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::config::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the process-wide tracing subscriber from configuration.
///
/// The filter comes from [`ObservabilityConfig::log_level`] (which
/// `CoreConfig::from_env` populates from `LOG_LEVEL`); a set `RUST_LOG`
/// takes precedence so operators can raise verbosity per-target without a
/// config change. Format follows `json_logs`. Repeated calls are no-ops, so
/// every entry point can call this unconditionally.
pub fn init_tracing(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json_logs {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer().compact()).try_init()
        };

        // Failure means some embedding application installed its own
        // subscriber first; route the notice there rather than stderr.
        if result.is_err() {
            tracing::debug!("tracing subscriber already installed; keeping it");
        }
    });
}

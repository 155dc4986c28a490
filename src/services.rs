//! Core service bundle.
//!
//! All collaborators are wired once at startup into a `CoreServices` value
//! that every stage receives as an `Arc`. There is no package-level mutable
//! state: registries are immutable after construction and stores hide their
//! own synchronization.

use std::sync::Arc;

use crate::bus::{LogOnlyBus, MessageBus};
use crate::enrich::{EnricherRegistry, ProviderServices};
use crate::ledger::LoopLedger;
use crate::notify::Notifier;
use crate::pending::Resumer;
use crate::stage::{ErrorSink, StageRunner};
use crate::store::{
    BlobStore, ExecutionLogStore, LedgerStore, PendingInputStore, PipelineRunStore, UserStore,
};
use crate::types::CoreConfig;
use crate::upload::UploaderRegistry;

/// Explicit dependency bundle passed into each stage.
#[derive(Debug)]
pub struct CoreServices {
    pub config: CoreConfig,
    pub bus: Arc<dyn MessageBus>,

    pub users: Arc<dyn UserStore>,
    pub runs: Arc<dyn PipelineRunStore>,
    pub executions: Arc<dyn ExecutionLogStore>,
    pub pending: Arc<dyn PendingInputStore>,
    pub ledger_store: Arc<dyn LedgerStore>,
    pub blobs: Arc<dyn BlobStore>,

    pub enrichers: EnricherRegistry,
    pub uploaders: UploaderRegistry,

    pub notifier: Arc<dyn Notifier>,
    pub errors: Arc<dyn ErrorSink>,
}

impl CoreServices {
    /// Wire the bundle. When `ENABLE_PUBLISH` is off the bus is replaced by
    /// a log-only decorator, so stages need no publish-gating of their own.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoreConfig,
        bus: Arc<dyn MessageBus>,
        users: Arc<dyn UserStore>,
        runs: Arc<dyn PipelineRunStore>,
        executions: Arc<dyn ExecutionLogStore>,
        pending: Arc<dyn PendingInputStore>,
        ledger_store: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
        enrichers: EnricherRegistry,
        uploaders: UploaderRegistry,
        notifier: Arc<dyn Notifier>,
        errors: Arc<dyn ErrorSink>,
    ) -> Arc<Self> {
        let bus: Arc<dyn MessageBus> = if config.publish.enable_publish {
            bus
        } else {
            Arc::new(LogOnlyBus)
        };

        Arc::new(Self {
            config,
            bus,
            users,
            runs,
            executions,
            pending,
            ledger_store,
            blobs,
            enrichers,
            uploaders,
            notifier,
            errors,
        })
    }

    /// Loop-prevention view over the ledger store.
    pub fn ledger(&self) -> LoopLedger {
        LoopLedger::new(self.ledger_store.clone())
    }

    /// Handles passed into enricher providers.
    pub fn provider_services(&self) -> ProviderServices {
        ProviderServices {
            pending: self.pending.clone(),
            blobs: self.blobs.clone(),
            notifier: self.notifier.clone(),
            limits: self.config.limits.clone(),
            artifact_bucket: self.config.blob.artifact_bucket.clone(),
            blob_scheme: self.config.blob.scheme.clone(),
        }
    }

    /// The uniform stage wrapper.
    pub fn stage_runner(&self) -> StageRunner {
        StageRunner::new(
            self.executions.clone(),
            self.errors.clone(),
            self.config.limits.stage_deadline,
        )
    }

    /// Pending-input resume surface.
    pub fn resumer(&self) -> Resumer {
        Resumer {
            pending: self.pending.clone(),
            blobs: self.blobs.clone(),
            runs: self.runs.clone(),
            bus: self.bus.clone(),
        }
    }
}

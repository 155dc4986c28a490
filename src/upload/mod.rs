//! Destination uploaders.
//!
//! Each adapter is bound to exactly one destination and only implements the
//! vendor calls; everything shared lives in [`UploadStage`]: blob resolution,
//! integration checks, the create-vs-update decision, description merging,
//! the ledger-before-substatus ordering, and the sync counter.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::activity::description::Description;
use crate::activity::{ActivityEnvelope, Destination};
use crate::bus::BusMessage;
use crate::ledger::LoopLedger;
use crate::pipeline::run::{DestinationStatus, PipelineRun};
use crate::services::CoreServices;
use crate::stage::{Stage, StageOutcome};
use crate::store::{BlobStore, PipelineRunStore, UserStore};
use crate::types::{Error, Result};
use crate::user::{Integration, UserRecord};

pub mod mock;
pub mod webhook;

pub use mock::{MockCall, MockMode, MockUploader};
pub use webhook::WebhookUploader;

// =============================================================================
// Uploader contract
// =============================================================================

/// What an adapter sees for one upload.
#[derive(Debug)]
pub struct UploadContext<'a> {
    pub envelope: &'a ActivityEnvelope,
    pub user: &'a UserRecord,
    pub integration: &'a Integration,
}

/// Successful vendor call result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// The vendor's id for the activity.
    pub external_id: String,
}

/// Remote activity state fetched before an update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteActivity {
    pub name: String,
    pub description: String,
}

/// Fields that actually changed, sent on update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdatePatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl UpdatePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }
}

/// Vendor adapter contract.
#[async_trait]
pub trait DestinationUploader: Send + Sync + fmt::Debug {
    fn destination(&self) -> Destination;

    /// Create the activity (FIT file when present, then attributes).
    async fn create(&self, ctx: &UploadContext<'_>) -> Result<UploadReceipt>;

    /// Fetch the remote name/description for the update merge.
    async fn remote_state(&self, ctx: &UploadContext<'_>, external_id: &str)
        -> Result<RemoteActivity>;

    /// Apply changed fields to an existing activity.
    async fn update(
        &self,
        ctx: &UploadContext<'_>,
        external_id: &str,
        patch: &UpdatePatch,
    ) -> Result<UploadReceipt>;
}

// =============================================================================
// Registry
// =============================================================================

/// Explicit uploader registration list, one adapter per destination.
#[derive(Debug, Default)]
pub struct UploaderRegistry {
    uploaders: HashMap<Destination, Arc<dyn DestinationUploader>>,
}

impl UploaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the shipped adapters.
    pub fn standard() -> Self {
        Self::new()
            .with_uploader(Arc::new(MockUploader::succeeding(Destination::Mock)))
            .with_uploader(Arc::new(WebhookUploader::new(Destination::Webhook)))
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn DestinationUploader>) -> Self {
        self.uploaders.insert(uploader.destination(), uploader);
        self
    }

    pub fn get(&self, destination: Destination) -> Option<Arc<dyn DestinationUploader>> {
        self.uploaders.get(&destination).cloned()
    }

    pub fn destinations(&self) -> Vec<Destination> {
        self.uploaders.keys().copied().collect()
    }
}

// =============================================================================
// Shared upload stage
// =============================================================================

/// The stage consuming `topic-dest-<vendor>` for one adapter.
#[derive(Debug)]
pub struct UploadStage {
    services: Arc<CoreServices>,
    uploader: Arc<dyn DestinationUploader>,
    service_name: String,
}

impl UploadStage {
    pub fn new(services: Arc<CoreServices>, uploader: Arc<dyn DestinationUploader>) -> Self {
        let service_name = format!("uploader-{}", uploader.destination().slug());
        Self {
            services,
            uploader,
            service_name,
        }
    }

    /// Resolve a blob-offloaded envelope back into its full form.
    async fn resolve_envelope(&self, envelope: ActivityEnvelope) -> Result<ActivityEnvelope> {
        match &envelope.activity_data_uri {
            None => Ok(envelope),
            Some(uri) => {
                let payload = self.services.blobs.get(uri).await?;
                let full: ActivityEnvelope = serde_json::from_slice(&payload)?;
                Ok(full)
            }
        }
    }

    /// Record a FAILED sub-status, then surface the error to the wrapper.
    async fn fail_destination(&self, envelope: &ActivityEnvelope, err: Error) -> Error {
        let Some(execution_id) = &envelope.pipeline_execution_id else {
            return err;
        };
        let result = self
            .services
            .runs
            .set_destination_status(
                &envelope.user_id,
                execution_id,
                self.uploader.destination(),
                DestinationStatus::failed(err.to_string(), Utc::now()),
            )
            .await;
        if let Err(store_err) = result {
            tracing::error!(
                service = %self.service_name,
                error = %store_err,
                "failed recording destination failure"
            );
        }
        err
    }

    /// The create-vs-update decision plus the vendor call.
    async fn perform(
        &self,
        ctx: &UploadContext<'_>,
        run: &PipelineRun,
    ) -> Result<(UploadReceipt, bool)> {
        let destination = self.uploader.destination();

        if ctx.envelope.resume.use_update_method {
            if let Some(external_id) = run.successful_external_id(destination) {
                let remote = self.uploader.remote_state(ctx, external_id).await?;

                let mut merged = Description::parse(&remote.description);
                merged.merge_with(&Description::parse(&ctx.envelope.description));
                let merged = merged.render();

                let patch = UpdatePatch {
                    name: (!ctx.envelope.name.is_empty()
                        && ctx.envelope.name != remote.name)
                        .then(|| ctx.envelope.name.clone()),
                    description: (merged != remote.description).then_some(merged),
                };

                if patch.is_empty() {
                    return Ok((
                        UploadReceipt {
                            external_id: external_id.to_string(),
                        },
                        false,
                    ));
                }

                let receipt = self.uploader.update(ctx, external_id, &patch).await?;
                return Ok((receipt, false));
            }
        }

        let receipt = self.uploader.create(ctx).await?;
        Ok((receipt, true))
    }
}

#[async_trait]
impl Stage for UploadStage {
    fn service(&self) -> &str {
        &self.service_name
    }

    async fn handle(
        &self,
        message: &BusMessage,
        _cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        let destination = self.uploader.destination();
        let envelope = self.resolve_envelope(message.decode_envelope()?).await?;
        let execution_id = envelope
            .pipeline_execution_id
            .clone()
            .ok_or_else(|| Error::validation("upload message without pipeline execution id"))?;

        let user = self.services.users.get_user(&envelope.user_id).await?;

        let integration = match user.integration(destination) {
            Some(integration) if integration.enabled => integration.clone(),
            Some(_) => {
                let err = Error::user_config(format!(
                    "{destination} integration is disabled; re-enable it to sync"
                ));
                return Err(self.fail_destination(&envelope, err).await);
            }
            None => {
                let err = Error::user_config(format!(
                    "no {destination} integration configured; connect it to sync"
                ));
                return Err(self.fail_destination(&envelope, err).await);
            }
        };

        let run = self
            .services
            .runs
            .get_run(&envelope.user_id, &execution_id)
            .await?;

        let ctx = UploadContext {
            envelope: &envelope,
            user: &user,
            integration: &integration,
        };

        let (receipt, created) = match self.perform(&ctx, &run).await {
            Ok(result) => result,
            Err(err) => return Err(self.fail_destination(&envelope, err).await),
        };

        // Ledger row lands before the sub-status flips to SUCCESS, so a
        // bounceback arriving between the two is still recognized.
        if created {
            let ledger = LoopLedger::new(self.services.ledger_store.clone());
            ledger
                .record_upload(
                    &envelope.user_id,
                    destination,
                    &receipt.external_id,
                    envelope.source,
                    envelope.standardized.start_time,
                )
                .await?;
        }

        self.services
            .runs
            .set_destination_status(
                &envelope.user_id,
                &execution_id,
                destination,
                DestinationStatus::success(receipt.external_id.clone(), Utc::now()),
            )
            .await?;

        if created {
            let count = self
                .services
                .users
                .increment_sync_count(&envelope.user_id, Utc::now())
                .await?;
            tracing::debug!(
                user_id = %envelope.user_id,
                destination = %destination,
                sync_count = count,
                "sync counted"
            );
        }

        Ok(StageOutcome::success_with(serde_json::json!({
            "destination": destination.slug(),
            "external_id": receipt.external_id,
            "created": created,
        })))
    }
}

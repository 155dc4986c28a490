//! Generic HTTP JSON destination.
//!
//! Posts enriched activities to a user-configured endpoint. Credentials:
//! `base_url` (required) and `token` (optional bearer). Vendor responses of
//! 400 and above become [`Error::VendorApi`] with a truncated body; the core
//! never retries them.

use async_trait::async_trait;
use serde::Deserialize;

use crate::activity::Destination;
use crate::types::{Error, Result};

use super::{DestinationUploader, RemoteActivity, UpdatePatch, UploadContext, UploadReceipt};

/// Webhook adapter.
#[derive(Debug)]
pub struct WebhookUploader {
    destination: Destination,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Deserialize, Default)]
struct ActivityResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

impl WebhookUploader {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            client: reqwest::Client::new(),
        }
    }

    fn base_url<'a>(&self, ctx: &'a UploadContext<'_>) -> Result<&'a str> {
        ctx.integration
            .credentials
            .get("base_url")
            .map(String::as_str)
            .ok_or_else(|| Error::user_config("webhook integration is missing base_url"))
    }

    fn authorize(&self, request: reqwest::RequestBuilder, ctx: &UploadContext<'_>)
        -> reqwest::RequestBuilder {
        match ctx.integration.credentials.get("token") {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map a non-success response to a vendor error with its body.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::vendor_api(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl DestinationUploader for WebhookUploader {
    fn destination(&self) -> Destination {
        self.destination
    }

    async fn create(&self, ctx: &UploadContext<'_>) -> Result<UploadReceipt> {
        let base = self.base_url(ctx)?;
        let envelope = ctx.envelope;

        let body = serde_json::json!({
            "activity_id": envelope.activity_id,
            "source": envelope.source,
            "type": envelope.standardized.activity_type,
            "start_time": envelope.standardized.start_time,
            "name": envelope.name,
            "description": envelope.description,
            "tags": envelope.tags,
            "distance_m": envelope.standardized.total_distance_m(),
            "elapsed_s": envelope.standardized.total_elapsed_time_s(),
            "fit_file_base64": envelope.fit_file_base64,
        });

        let request = self
            .client
            .post(format!("{base}/activities"))
            .json(&body);
        let response = Self::check(self.authorize(request, ctx).send().await?).await?;

        let created: CreateResponse = response.json().await?;
        Ok(UploadReceipt {
            external_id: created.id,
        })
    }

    async fn remote_state(
        &self,
        ctx: &UploadContext<'_>,
        external_id: &str,
    ) -> Result<RemoteActivity> {
        let base = self.base_url(ctx)?;
        let request = self.client.get(format!("{base}/activities/{external_id}"));
        let response = Self::check(self.authorize(request, ctx).send().await?).await?;

        let remote: ActivityResponse = response.json().await?;
        Ok(RemoteActivity {
            name: remote.name,
            description: remote.description,
        })
    }

    async fn update(
        &self,
        ctx: &UploadContext<'_>,
        external_id: &str,
        patch: &UpdatePatch,
    ) -> Result<UploadReceipt> {
        let base = self.base_url(ctx)?;

        let mut body = serde_json::Map::new();
        if let Some(name) = &patch.name {
            body.insert("name".to_string(), serde_json::json!(name));
        }
        if let Some(description) = &patch.description {
            body.insert("description".to_string(), serde_json::json!(description));
        }

        let request = self
            .client
            .put(format!("{base}/activities/{external_id}"))
            .json(&serde_json::Value::Object(body));
        Self::check(self.authorize(request, ctx).send().await?).await?;

        Ok(UploadReceipt {
            external_id: external_id.to_string(),
        })
    }
}

//! Footer branding.
//!
//! Appends a header-less footer block and a tag. Users can override the
//! footer text per pipeline via the `text` input.

use async_trait::async_trait;

use crate::enrich::{EnrichContext, EnricherProvider, EnrichmentResult, ProviderType};
use crate::types::Result;

const DEFAULT_FOOTER: &str = "Synced with Fitlink 🔗";

#[derive(Debug, Default)]
pub struct BrandingProvider;

#[async_trait]
impl EnricherProvider for BrandingProvider {
    fn name(&self) -> &str {
        "Branding"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Branding
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichmentResult> {
        let footer = ctx.input("text").unwrap_or(DEFAULT_FOOTER);
        Ok(EnrichmentResult::empty()
            .with_description(footer)
            .with_tag("fitlink"))
    }
}

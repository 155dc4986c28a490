//! User-supplied activity titles.
//!
//! Needs a `title` value. When the step config or resume data does not carry
//! one, the envelope is parked as a pending input and the run waits. On the
//! auto-resume pass (`do_not_retry`) a default title is filled instead.

use async_trait::async_trait;

use crate::activity::ActivityType;
use crate::enrich::{EnrichContext, EnricherProvider, EnrichmentResult, ProviderType};
use crate::pending;
use crate::types::Result;

/// Section header owned by this provider.
pub const SECTION_HEADER: &str = "📝 Title:";

#[derive(Debug, Default)]
pub struct CustomTitleProvider;

fn default_title(activity_type: ActivityType) -> &'static str {
    match activity_type {
        ActivityType::Run => "Run",
        ActivityType::Ride => "Ride",
        ActivityType::Swim => "Swim",
        ActivityType::Walk => "Walk",
        ActivityType::Hike => "Hike",
        ActivityType::StrengthTraining => "Strength Training",
        ActivityType::Workout => "Workout",
        ActivityType::Other => "Activity",
    }
}

#[async_trait]
impl EnricherProvider for CustomTitleProvider {
    fn name(&self) -> &str {
        "Custom Title"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::CustomTitle
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichmentResult> {
        if let Some(title) = ctx.input("title").filter(|t| !t.trim().is_empty()) {
            let title = title.trim().to_string();
            return Ok(EnrichmentResult::empty()
                .with_name(title.clone())
                .with_section(SECTION_HEADER, format!("{SECTION_HEADER} {title}")));
        }

        if ctx.do_not_retry {
            // Final pass: fill a default instead of waiting forever.
            let title = default_title(ctx.envelope.standardized.activity_type);
            return Ok(EnrichmentResult::empty()
                .with_name(title)
                .with_metadata("auto_titled", "true"));
        }

        let pending_id = pending::park(
            ctx.services,
            ctx.envelope,
            ctx.user,
            self.provider_type(),
            vec!["title".to_string()],
        )
        .await?;

        Ok(EnrichmentResult::awaiting(pending_id))
    }
}

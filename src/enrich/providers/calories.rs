//! Calorie estimation.
//!
//! MET-based estimate from session elapsed time, activity type, and the
//! user's weight. Contributes a `🔥 Calories:` section and a metadata key.

use async_trait::async_trait;

use crate::activity::ActivityType;
use crate::enrich::{EnrichContext, EnricherProvider, EnrichmentResult, ProviderType};
use crate::types::Result;

/// Section header owned by this provider.
pub const SECTION_HEADER: &str = "🔥 Calories:";

/// Weight assumed when the user has no profile value.
const DEFAULT_WEIGHT_KG: f64 = 75.0;

#[derive(Debug, Default)]
pub struct CaloriesProvider;

fn met_for(activity_type: ActivityType) -> f64 {
    match activity_type {
        ActivityType::Run => 9.8,
        ActivityType::Ride => 7.5,
        ActivityType::Swim => 8.0,
        ActivityType::Walk => 3.5,
        ActivityType::Hike => 6.0,
        ActivityType::StrengthTraining => 5.0,
        ActivityType::Workout | ActivityType::Other => 4.0,
    }
}

#[async_trait]
impl EnricherProvider for CaloriesProvider {
    fn name(&self) -> &str {
        "Calorie Estimate"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Calories
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichmentResult> {
        let standardized = &ctx.envelope.standardized;

        // Vendors sometimes report calories directly; prefer that.
        let reported: f64 = standardized
            .sessions
            .iter()
            .filter_map(|s| s.total_calories_kcal)
            .sum();

        let kcal = if reported > 0.0 {
            reported
        } else {
            let hours = standardized.total_elapsed_time_s() / 3600.0;
            if hours <= 0.0 {
                return Ok(EnrichmentResult::empty());
            }
            let weight = ctx.user.profile.weight_kg.unwrap_or(DEFAULT_WEIGHT_KG);
            met_for(standardized.activity_type) * weight * hours
        };

        let kcal = kcal.round() as i64;
        Ok(EnrichmentResult::empty()
            .with_section(SECTION_HEADER, format!("{SECTION_HEADER} {kcal} kcal"))
            .with_metadata("calories_kcal", kcal.to_string()))
    }
}

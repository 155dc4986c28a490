//! Rule-driven pipeline gate.
//!
//! Evaluates a rule list against the envelope and either halts or lets the
//! chain continue. Inputs (`rules` as a JSON array, `match`, `on_match`) are
//! UI strings parsed with typed accessors; parse failures are internal
//! errors, not user errors, because the UI validates on save.

use async_trait::async_trait;
use serde::Deserialize;

use crate::activity::ActivityEnvelope;
use crate::enrich::{EnrichContext, EnricherProvider, EnrichmentResult, ProviderType};
use crate::types::{Error, Result};

/// Supported rule operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    Eq,
    Ne,
    Contains,
    Gt,
    Lt,
}

/// One rule over an envelope field.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub field: String,
    pub op: RuleOp,
    pub value: String,
}

/// How rule results combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    All,
    Any,
}

/// What happens when the rules match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchAction {
    #[default]
    Halt,
    Continue,
}

#[derive(Debug, Default)]
pub struct LogicGateProvider;

/// Resolve a rule field to its string form on the envelope.
fn field_value(envelope: &ActivityEnvelope, field: &str) -> Option<String> {
    match field {
        "activity_type" => Some(envelope.standardized.activity_type.to_string()),
        "source" => Some(envelope.source.to_string()),
        "name" => Some(envelope.name.clone()),
        "distance_m" => Some(envelope.standardized.total_distance_m().to_string()),
        "elapsed_s" => Some(envelope.standardized.total_elapsed_time_s().to_string()),
        _ => None,
    }
}

fn evaluate(rule: &Rule, envelope: &ActivityEnvelope) -> Result<bool> {
    let Some(actual) = field_value(envelope, &rule.field) else {
        return Err(Error::internal(format!(
            "logic gate references unknown field '{}'",
            rule.field
        )));
    };

    Ok(match rule.op {
        RuleOp::Eq => actual.eq_ignore_ascii_case(&rule.value),
        RuleOp::Ne => !actual.eq_ignore_ascii_case(&rule.value),
        RuleOp::Contains => actual.to_lowercase().contains(&rule.value.to_lowercase()),
        RuleOp::Gt => {
            let (a, b) = numeric_pair(&actual, &rule.value)?;
            a > b
        }
        RuleOp::Lt => {
            let (a, b) = numeric_pair(&actual, &rule.value)?;
            a < b
        }
    })
}

fn numeric_pair(actual: &str, expected: &str) -> Result<(f64, f64)> {
    let a = actual
        .parse::<f64>()
        .map_err(|_| Error::internal(format!("logic gate field value not numeric: {actual}")))?;
    let b = expected
        .parse::<f64>()
        .map_err(|_| Error::internal(format!("logic gate rule value not numeric: {expected}")))?;
    Ok((a, b))
}

#[async_trait]
impl EnricherProvider for LogicGateProvider {
    fn name(&self) -> &str {
        "Logic Gate"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::LogicGate
    }

    async fn enrich(&self, ctx: &EnrichContext<'_>) -> Result<EnrichmentResult> {
        let rules: Vec<Rule> = match ctx.input("rules") {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| Error::internal(format!("logic gate rules unparsable: {e}")))?,
            None => Vec::new(),
        };
        if rules.is_empty() {
            return Ok(EnrichmentResult::empty());
        }

        let mode: MatchMode = match ctx.input("match") {
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_string()))
                .map_err(|e| Error::internal(format!("logic gate match mode unparsable: {e}")))?,
            None => MatchMode::default(),
        };
        let action: MatchAction = match ctx.input("on_match") {
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_string()))
                .map_err(|e| Error::internal(format!("logic gate action unparsable: {e}")))?,
            None => MatchAction::default(),
        };

        let mut results = Vec::with_capacity(rules.len());
        for rule in &rules {
            results.push(evaluate(rule, ctx.envelope)?);
        }
        let matched = match mode {
            MatchMode::All => results.iter().all(|r| *r),
            MatchMode::Any => results.iter().any(|r| *r),
        };

        let halt = matches!(
            (matched, action),
            (true, MatchAction::Halt) | (false, MatchAction::Continue)
        );

        if halt {
            tracing::info!(rules = rules.len(), ?mode, "logic gate halting pipeline");
            Ok(EnrichmentResult::halt())
        } else {
            Ok(EnrichmentResult::empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityType, Source, StandardizedActivity};
    use crate::enrich::ProviderServices;
    use crate::notify::LogNotifier;
    use crate::store::MemoryStore;
    use crate::types::config::PipelineLimits;
    use crate::types::UserId;
    use crate::user::UserRecord;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn provider_services() -> ProviderServices {
        let store = MemoryStore::new_shared();
        ProviderServices {
            pending: store.clone(),
            blobs: store,
            notifier: Arc::new(LogNotifier),
            limits: PipelineLimits::default(),
            artifact_bucket: "test".to_string(),
            blob_scheme: "mem".to_string(),
        }
    }

    fn run_envelope() -> ActivityEnvelope {
        ActivityEnvelope::new(
            Source::Garmin,
            UserId::from_string("u1".to_string()).unwrap(),
            StandardizedActivity::new(ActivityType::Run),
        )
    }

    async fn gate(inputs: &HashMap<String, String>, envelope: &ActivityEnvelope) -> Result<EnrichmentResult> {
        let user = UserRecord::new(UserId::from_string("u1".to_string()).unwrap());
        let services = provider_services();
        let ctx = EnrichContext {
            envelope,
            user: &user,
            inputs,
            do_not_retry: false,
            resume_input_data: None,
            services: &services,
        };
        LogicGateProvider.enrich(&ctx).await
    }

    fn inputs(rules: &str, mode: &str, action: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("rules".to_string(), rules.to_string());
        map.insert("match".to_string(), mode.to_string());
        map.insert("on_match".to_string(), action.to_string());
        map
    }

    #[tokio::test]
    async fn test_matching_rule_halts() {
        let result = gate(
            &inputs(
                r#"[{"field":"activity_type","op":"eq","value":"RUN"}]"#,
                "all",
                "halt",
            ),
            &run_envelope(),
        )
        .await
        .unwrap();
        assert!(result.halt_pipeline);
    }

    #[tokio::test]
    async fn test_non_matching_rule_continues() {
        let result = gate(
            &inputs(
                r#"[{"field":"activity_type","op":"eq","value":"RIDE"}]"#,
                "all",
                "halt",
            ),
            &run_envelope(),
        )
        .await
        .unwrap();
        assert!(!result.halt_pipeline);
    }

    #[tokio::test]
    async fn test_continue_action_halts_on_no_match() {
        // on_match=continue means: only matching activities pass the gate.
        let result = gate(
            &inputs(
                r#"[{"field":"activity_type","op":"eq","value":"RIDE"}]"#,
                "all",
                "continue",
            ),
            &run_envelope(),
        )
        .await
        .unwrap();
        assert!(result.halt_pipeline);
    }

    #[tokio::test]
    async fn test_any_mode() {
        let result = gate(
            &inputs(
                r#"[
                    {"field":"activity_type","op":"eq","value":"RIDE"},
                    {"field":"source","op":"eq","value":"garmin"}
                ]"#,
                "any",
                "halt",
            ),
            &run_envelope(),
        )
        .await
        .unwrap();
        assert!(result.halt_pipeline);
    }

    #[tokio::test]
    async fn test_numeric_comparison() {
        let mut envelope = run_envelope();
        envelope.standardized.sessions.push(crate::activity::Session {
            total_distance_m: 5000.0,
            ..Default::default()
        });
        let result = gate(
            &inputs(
                r#"[{"field":"distance_m","op":"gt","value":"4000"}]"#,
                "all",
                "halt",
            ),
            &envelope,
        )
        .await
        .unwrap();
        assert!(result.halt_pipeline);
    }

    #[tokio::test]
    async fn test_bad_rules_surface_as_internal() {
        let err = gate(&inputs("not json", "all", "halt"), &run_envelope())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let err = gate(
            &inputs(
                r#"[{"field":"nonexistent","op":"eq","value":"x"}]"#,
                "all",
                "halt",
            ),
            &run_envelope(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_no_rules_is_a_no_op() {
        let result = gate(&HashMap::new(), &run_envelope()).await.unwrap();
        assert_eq!(result, EnrichmentResult::empty());
    }
}

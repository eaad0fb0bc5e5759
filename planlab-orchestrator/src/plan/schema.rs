//! Prompt text, output schema and response validation for plan generation

use super::model::{Experiment, Metrics, Plan};
use crate::provider::ProviderError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

pub const SYSTEM_PROMPT: &str = "You are an expert machine learning engineer who designs \
    comparative experiments. You answer only with JSON matching the requested schema.";

/// Build the instruction sent for a goal
pub fn build_prompt(goal: &str) -> String {
    format!(
        r#"The user wants to achieve the following machine learning goal:

"{goal}"

Design a comparative experiment plan:
1. Identify 3-4 distinct candidate models or approaches that could reach this goal.
2. For each candidate give realistic simulated final metrics: accuracy as a fraction
   between 0 and 1, inference latency in milliseconds, and model size in megabytes.
   Respect real trade-offs: smaller and faster models usually give up some accuracy.
3. Recommend one candidate as the winner. Honor any constraint implied by the goal
   (for example, if the user asks for something fast, prioritize latency; if they
   ask for precision, prioritize accuracy). Use that candidate's id as
   recommendedWinnerId.
4. Write a short analysis of the goal and a short summary of the recommendation.

Give every experiment a short unique id such as "exp-1"."#,
        goal = goal.trim()
    )
}

/// JSON Schema for the plan response; every field is required
pub fn plan_schema() -> Value {
    let metrics = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "accuracy": {"type": "number", "description": "Fraction between 0 and 1"},
            "latencyMs": {"type": "number", "description": "Inference latency in milliseconds"},
            "modelSizeMb": {"type": "number", "description": "Model size in megabytes"}
        },
        "required": ["accuracy", "latencyMs", "modelSizeMb"]
    });

    let experiment = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "id": {"type": "string"},
            "name": {"type": "string"},
            "description": {"type": "string"},
            "simulatedMetrics": metrics
        },
        "required": ["id", "name", "description", "simulatedMetrics"]
    });

    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "title": {"type": "string"},
            "goalAnalysis": {"type": "string"},
            "experiments": {"type": "array", "items": experiment},
            "recommendedWinnerId": {"type": "string"},
            "summary": {"type": "string"}
        },
        "required": ["title", "goalAnalysis", "experiments", "recommendedWinnerId", "summary"]
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanDraft {
    title: String,
    goal_analysis: String,
    experiments: Vec<ExperimentDraft>,
    recommended_winner_id: String,
    summary: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentDraft {
    id: String,
    name: String,
    description: String,
    simulated_metrics: Metrics,
}

/// Strip a surrounding Markdown code fence, if any
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip an info string such as `json`
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn validate_metrics(id: &str, m: &Metrics) -> Result<(), ProviderError> {
    if !m.accuracy.is_finite() || !(0.0..=1.0).contains(&m.accuracy) {
        return Err(ProviderError::Schema(format!(
            "experiment {} accuracy {} is outside [0, 1]",
            id, m.accuracy
        )));
    }
    for (field, value) in [("latencyMs", m.latency_ms), ("modelSizeMb", m.model_size_mb)] {
        if !value.is_finite() || value < 0.0 {
            return Err(ProviderError::Schema(format!(
                "experiment {} {} {} must be a non-negative number",
                id, field, value
            )));
        }
    }
    Ok(())
}

/// Parse and validate a model response into a fresh [`Plan`]
///
/// Experiments come back `pending`, at progress 0, with zeroed live metrics.
pub fn parse_plan(content: &str) -> Result<Plan, ProviderError> {
    let body = strip_code_fence(content);
    if body.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }

    let draft: PlanDraft =
        serde_json::from_str(body).map_err(|e| ProviderError::Schema(e.to_string()))?;

    if draft.experiments.is_empty() {
        return Err(ProviderError::Schema("plan has no experiments".to_string()));
    }

    let mut seen = HashSet::new();
    for exp in &draft.experiments {
        if exp.id.trim().is_empty() {
            return Err(ProviderError::Schema("experiment with empty id".to_string()));
        }
        if !seen.insert(exp.id.as_str()) {
            return Err(ProviderError::Schema(format!(
                "duplicate experiment id {}",
                exp.id
            )));
        }
        validate_metrics(&exp.id, &exp.simulated_metrics)?;
    }

    let experiments = draft
        .experiments
        .into_iter()
        .map(|e| Experiment::new(e.id, e.name, e.description, e.simulated_metrics))
        .collect();

    Ok(Plan {
        title: draft.title,
        goal_analysis: draft.goal_analysis,
        experiments,
        recommended_winner_id: draft.recommended_winner_id,
        summary: draft.summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::model::ExperimentStatus;
    use crate::plan::test_support::fraud_response;

    #[test]
    fn test_prompt_mentions_goal_and_constraints() {
        let prompt = build_prompt("  Detect credit card fraud with high precision ");
        assert!(prompt.contains("\"Detect credit card fraud with high precision\""));
        assert!(prompt.contains("3-4"));
        assert!(prompt.contains("latency"));
    }

    #[test]
    fn test_schema_requires_every_field() {
        let schema = plan_schema();
        assert_eq!(schema["required"].as_array().unwrap().len(), 5);
        let exp = &schema["properties"]["experiments"]["items"];
        assert_eq!(exp["required"].as_array().unwrap().len(), 4);
        assert_eq!(
            exp["properties"]["simulatedMetrics"]["required"],
            json!(["accuracy", "latencyMs", "modelSizeMb"])
        );
    }

    #[test]
    fn test_parse_adds_defaults() {
        let plan = parse_plan(&fraud_response()).unwrap();
        assert_eq!(plan.experiments.len(), 3);
        for exp in &plan.experiments {
            assert_eq!(exp.status, ExperimentStatus::Pending);
            assert_eq!(exp.progress, 0);
            assert_eq!(exp.live_metrics, Metrics::ZERO);
        }
        assert_eq!(plan.experiments[1].simulated_metrics.latency_ms, 1.2);
    }

    #[test]
    fn test_parse_fenced_response() {
        let fenced = format!("```json\n{}\n```", fraud_response());
        assert_eq!(parse_plan(&fenced).unwrap().title, "Credit Card Fraud Detection");
    }

    #[test]
    fn test_missing_field_is_schema_error() {
        let mut value: Value = serde_json::from_str(&fraud_response()).unwrap();
        value["experiments"][0]["simulatedMetrics"]
            .as_object_mut()
            .unwrap()
            .remove("latencyMs");
        let err = parse_plan(&value.to_string()).unwrap_err();
        assert!(matches!(err, ProviderError::Schema(_)));

        let err = parse_plan("{\"title\": \"only\"}").unwrap_err();
        assert!(matches!(err, ProviderError::Schema(_)));
    }

    #[test]
    fn test_invalid_plans_rejected() {
        let mut dup: Value = serde_json::from_str(&fraud_response()).unwrap();
        dup["experiments"][1]["id"] = json!("exp-1");
        assert!(matches!(
            parse_plan(&dup.to_string()),
            Err(ProviderError::Schema(_))
        ));

        let mut accuracy: Value = serde_json::from_str(&fraud_response()).unwrap();
        accuracy["experiments"][2]["simulatedMetrics"]["accuracy"] = json!(92.0);
        assert!(matches!(
            parse_plan(&accuracy.to_string()),
            Err(ProviderError::Schema(_))
        ));

        let mut latency: Value = serde_json::from_str(&fraud_response()).unwrap();
        latency["experiments"][0]["simulatedMetrics"]["latencyMs"] = json!(-1.0);
        assert!(matches!(
            parse_plan(&latency.to_string()),
            Err(ProviderError::Schema(_))
        ));

        let mut empty: Value = serde_json::from_str(&fraud_response()).unwrap();
        empty["experiments"] = json!([]);
        assert!(matches!(
            parse_plan(&empty.to_string()),
            Err(ProviderError::Schema(_))
        ));
    }

    #[test]
    fn test_blank_content_is_empty_response() {
        assert!(matches!(parse_plan("   "), Err(ProviderError::EmptyResponse)));
        assert!(matches!(parse_plan("```json\n```"), Err(ProviderError::EmptyResponse)));
    }

    #[test]
    fn test_unknown_winner_is_not_an_error() {
        let mut value: Value = serde_json::from_str(&fraud_response()).unwrap();
        value["recommendedWinnerId"] = json!("exp-99");
        let plan = parse_plan(&value.to_string()).unwrap();
        assert_eq!(plan.winner().unwrap().id, "exp-1");
    }
}

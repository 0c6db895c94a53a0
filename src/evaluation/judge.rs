//! LLM-as-judge comparison of a generated report against a reference.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Dimension, DimensionScore, EvaluationScore};
use crate::error::EvaluationError;
use crate::llm::json::{extract_json_object, snippet};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

const JUDGE_TEMPERATURE: f32 = 0.0;
const JUDGE_MAX_TOKENS: u32 = 2048;

pub struct JudgeEvaluator {
    llm: Arc<dyn LlmProvider>,
}

impl JudgeEvaluator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Score `generated` against `reference`, both Markdown.
    pub async fn evaluate(
        &self,
        generated: &str,
        reference: &str,
        report_id: Option<Uuid>,
    ) -> Result<EvaluationScore, EvaluationError> {
        if generated.trim().is_empty() {
            return Err(EvaluationError::EmptyInput("generated report"));
        }
        if reference.trim().is_empty() {
            return Err(EvaluationError::EmptyInput("reference report"));
        }

        let user = format!(
            "Reference Report:\n{reference}\n\n---\n\nGenerated Report:\n{generated}"
        );
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_judge_prompt()),
            ChatMessage::user(user),
        ])
        .with_temperature(JUDGE_TEMPERATURE)
        .with_max_tokens(JUDGE_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        let dimensions = parse_verdict(&response.content).inspect_err(|e| {
            warn!(
                error = %e,
                response = %snippet(&response.content),
                "Judge response rejected"
            );
        })?;

        let score = EvaluationScore::new(report_id, dimensions, self.llm.model_name());
        info!(overall = score.overall, "Report evaluated");
        Ok(score)
    }
}

fn build_judge_prompt() -> String {
    let dimensions: String = Dimension::ALL
        .iter()
        .map(|d| format!("- {}: {}\n", d, d.description()))
        .collect();
    format!(
        "You are an expert evaluator of website analytics reports. Compare the \
         generated report with the reference report written by a human analyst.\n\n\
         Score the generated report from 1 (poor) to 10 (excellent) on each dimension:\n\
         {dimensions}\n\
         Respond with a JSON object:\n\
         {{\n\
           \"scores\": [\n\
             {{\"dimension\": \"Accuracy\", \"score\": 7, \"rationale\": \"One or two sentences\"}}\n\
           ]\n\
         }}\n\n\
         Include every dimension exactly once. ONLY output the JSON object."
    )
}

/// Parse judge output into one score per dimension.
///
/// Accepts a `scores` array of `{dimension, score, rationale}` objects, or
/// an object keyed by dimension name whose values are either a score or a
/// `{score, rationale}` object.
fn parse_verdict(raw: &str) -> Result<Vec<DimensionScore>, EvaluationError> {
    let value: Value = serde_json::from_str(&extract_json_object(raw))
        .map_err(|e| EvaluationError::InvalidResponse(e.to_string()))?;
    let Value::Object(root) = value else {
        return Err(EvaluationError::InvalidResponse("expected a JSON object".into()));
    };

    let mut found: Vec<(Dimension, Option<f64>, String)> = Vec::new();
    match root.get("scores") {
        Some(Value::Array(entries)) => {
            for entry in entries {
                let Some(obj) = entry.as_object() else { continue };
                let Some(dimension) = obj
                    .get("dimension")
                    .and_then(Value::as_str)
                    .and_then(Dimension::parse)
                else {
                    continue;
                };
                found.push((dimension, obj.get("score").and_then(score_value), rationale(obj)));
            }
        }
        Some(Value::Object(map)) => collect_keyed(map, &mut found),
        _ => collect_keyed(&root, &mut found),
    }

    Dimension::ALL
        .iter()
        .map(|&dimension| {
            let (_, raw_score, rationale) = found
                .iter()
                .find(|(d, _, _)| *d == dimension)
                .ok_or_else(|| EvaluationError::MissingDimension(dimension.to_string()))?;
            let raw_score = raw_score.ok_or_else(|| {
                EvaluationError::InvalidResponse(format!("no numeric score for {dimension}"))
            })?;
            Ok(DimensionScore::new(dimension, raw_score, rationale.clone()))
        })
        .collect()
}

fn collect_keyed(map: &Map<String, Value>, found: &mut Vec<(Dimension, Option<f64>, String)>) {
    for (key, value) in map {
        let Some(dimension) = Dimension::parse(key) else { continue };
        match value {
            Value::Object(obj) => {
                found.push((dimension, obj.get("score").and_then(score_value), rationale(obj)))
            }
            other => found.push((dimension, score_value(other), String::new())),
        }
    }
}

fn rationale(obj: &Map<String, Value>) -> String {
    ["rationale", "reason", "justification"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// `8`, `7.5`, `"8"` and `"8/10"` are all accepted.
fn score_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split('/').next()?.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedLlm;

    const VERDICT: &str = r#"{"scores": [
        {"dimension": "Accuracy", "score": 8, "rationale": "Numbers match"},
        {"dimension": "Completeness", "score": 6, "rationale": "Misses search"},
        {"dimension": "Actionability", "score": "9/10", "rationale": "Concrete"},
        {"dimension": "Clarity", "score": 12, "rationale": "Clear"},
        {"dimension": "relevance", "score": 7.4, "reason": "On topic"}
    ]}"#;

    #[test]
    fn test_judge_prompt_lists_dimensions() {
        let prompt = build_judge_prompt();
        for d in Dimension::ALL {
            assert!(prompt.contains(d.as_str()));
        }
        assert!(prompt.contains("\"scores\""));
    }

    #[test]
    fn test_parse_verdict_array() {
        let scores = parse_verdict(VERDICT).unwrap();
        let values: Vec<u8> = scores.iter().map(|s| s.score).collect();
        assert_eq!(values, vec![8, 6, 9, 10, 7]);
        assert_eq!(scores[4].rationale, "On topic");
    }

    #[test]
    fn test_parse_verdict_keyed_object() {
        let raw = r#"```json
{"Accuracy": {"score": 5, "rationale": "x"}, "Completeness": 4, "Actionability": 3, "Clarity": 2, "Relevance": 1}
```"#;
        let scores = parse_verdict(raw).unwrap();
        assert_eq!(scores[0].score, 5);
        assert_eq!(scores[1].score, 4);
        assert_eq!(scores[4].score, 1);
    }

    #[test]
    fn test_parse_verdict_missing_dimension() {
        let raw = r#"{"scores": [{"dimension": "Accuracy", "score": 8}]}"#;
        assert!(matches!(
            parse_verdict(raw),
            Err(EvaluationError::MissingDimension(d)) if d == "Completeness"
        ));
    }

    #[test]
    fn test_parse_verdict_garbage() {
        assert!(matches!(
            parse_verdict("I think it is good."),
            Err(EvaluationError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_evaluate_scores_report() {
        let llm = Arc::new(ScriptedLlm::replying(VERDICT));
        let id = Uuid::new_v4();
        let score = JudgeEvaluator::new(llm.clone())
            .evaluate("# Generated", "# Reference", Some(id))
            .await
            .unwrap();
        assert_eq!(score.report_id, Some(id));
        assert_eq!(score.overall, 8.0);
        assert_eq!(score.model, "scripted");
        let prompt = llm.last_user_prompt();
        assert!(prompt.find("# Reference").unwrap() < prompt.find("# Generated").unwrap());
    }

    #[tokio::test]
    async fn test_evaluate_rejects_empty_input() {
        let llm = Arc::new(ScriptedLlm::replying(VERDICT));
        let err = JudgeEvaluator::new(llm.clone())
            .evaluate("  ", "# Reference", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::EmptyInput("generated report")));
        assert!(llm.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_propagates_llm_failure() {
        let llm = Arc::new(ScriptedLlm::failing());
        let err = JudgeEvaluator::new(llm)
            .evaluate("# Generated", "# Reference", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Llm(_)));
    }
}

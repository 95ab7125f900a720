// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ai-pipelines contributors

//! Structured-output reconciliation
//!
//! A response can carry a structured block, a free-form result message, or
//! both. When the step declares an output schema the candidates are tried in
//! a fixed order (structured block, then the result text) and the first one
//! that conforms wins.

use std::sync::OnceLock;

use jsonschema::Validator;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::ModelResponse;
use crate::errors::PipelineError;
use crate::pipeline::schema;

fn fenced_json() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

/// Turn a model response into the value bound to `step`
pub fn reconcile(
    step: &str,
    response: &ModelResponse,
    schema: Option<&Value>,
) -> Result<Value, PipelineError> {
    if response.is_error {
        return Err(llm_error(
            step,
            format!(
                "model reported an error: {}",
                response.result.as_deref().unwrap_or("no details")
            ),
        ));
    }

    let Some(schema) = schema else {
        return as_text(step, response);
    };
    let validator = schema::compile(schema)
        .map_err(|reason| llm_error(step, format!("output schema is invalid: {}", reason)))?;

    let mut rejected = Vec::new();

    if let Some(block) = &response.structured_output {
        match parse_block(block).and_then(|v| conform(&validator, v)) {
            Ok(value) => return Ok(value),
            Err(reason) => rejected.push(format!("structured output {}", reason)),
        }
    }

    if let Some(text) = &response.result {
        match parse_text(text).and_then(|v| conform(&validator, v)) {
            Ok(value) => {
                if !rejected.is_empty() {
                    warn!(step_name = step, "structured output rejected, using result text");
                }
                return Ok(value);
            }
            Err(reason) => rejected.push(format!("result text {}", reason)),
        }
    }

    if rejected.is_empty() {
        return Err(llm_error(step, "model returned no output"));
    }
    Err(llm_error(
        step,
        format!("no output matched the declared schema: {}", rejected.join("; ")),
    ))
}

fn as_text(step: &str, response: &ModelResponse) -> Result<Value, PipelineError> {
    if let Some(text) = &response.result {
        return Ok(Value::String(text.clone()));
    }
    match &response.structured_output {
        Some(Value::String(s)) => Ok(Value::String(s.clone())),
        Some(other) => Ok(Value::String(other.to_string())),
        None => Err(llm_error(step, "model returned no output")),
    }
}

/// The CLI sometimes hands the structured block back as a JSON string
fn parse_block(block: &Value) -> Result<Value, String> {
    match block {
        Value::String(s) => serde_json::from_str(s)
            .map_err(|e| format!("was a string that is not valid JSON ({})", e)),
        other => Ok(other.clone()),
    }
}

fn parse_text(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let Some(captures) = fenced_json().and_then(|re| re.captures(trimmed)) {
        let body = captures.get(1).map_or("", |m| m.as_str());
        return serde_json::from_str(body.trim())
            .map_err(|e| format!("had a fenced block that is not valid JSON ({})", e));
    }
    Err("is not valid JSON".to_string())
}

fn conform(validator: &Validator, value: Value) -> Result<Value, String> {
    schema::conforms(validator, &value)
        .map(|()| value)
        .map_err(|violation| format!("does not match the schema: {}", violation))
}

fn llm_error(step: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::Llm {
        step: step.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {"verdict": {"type": "string"}},
            "required": ["verdict"]
        })
    }

    fn response(structured: Option<Value>, text: Option<&str>) -> ModelResponse {
        ModelResponse {
            structured_output: structured,
            result: text.map(String::from),
            cost_usd: None,
            is_error: false,
        }
    }

    #[test]
    fn test_structured_block_wins_over_conflicting_text() {
        let r = response(
            Some(json!({"verdict": "from block"})),
            Some(r#"{"verdict": "from text"}"#),
        );
        let value = reconcile("judge", &r, Some(&schema())).unwrap();
        assert_eq!(value, json!({"verdict": "from block"}));
    }

    #[test]
    fn test_string_block_is_parsed() {
        let r = response(Some(json!(r#"{"verdict": "yes"}"#)), None);
        assert_eq!(
            reconcile("judge", &r, Some(&schema())).unwrap(),
            json!({"verdict": "yes"})
        );
    }

    #[test]
    fn test_falls_back_to_result_text() {
        let r = response(None, Some(" {\"verdict\": \"no\"}\n"));
        assert_eq!(
            reconcile("judge", &r, Some(&schema())).unwrap(),
            json!({"verdict": "no"})
        );
    }

    #[test]
    fn test_non_conforming_block_falls_back_to_text() {
        let r = response(Some(json!({"other": 1})), Some(r#"{"verdict": "text"}"#));
        assert_eq!(
            reconcile("judge", &r, Some(&schema())).unwrap(),
            json!({"verdict": "text"})
        );
    }

    #[test]
    fn test_fenced_json_in_text() {
        let text = "Here you go:\n```json\n{\"verdict\": \"fenced\"}\n```\nThanks";
        let r = response(None, Some(text));
        assert_eq!(
            reconcile("judge", &r, Some(&schema())).unwrap(),
            json!({"verdict": "fenced"})
        );
    }

    #[test]
    fn test_nothing_conforms_is_llm_error() {
        let r = response(Some(json!({"x": 1})), Some("I refuse"));
        let err = reconcile("judge", &r, Some(&schema())).unwrap_err();
        match err {
            PipelineError::Llm { step, message } => {
                assert_eq!(step, "judge");
                assert!(message.contains("structured output"));
                assert!(message.contains("result text is not valid JSON"));
            }
            other => panic!("Expected Llm error, got {:?}", other),
        }
    }

    #[test]
    fn test_block_outside_numeric_bounds_falls_back() {
        let bounded = json!({
            "type": "object",
            "properties": {"score": {"type": "number", "minimum": 0, "maximum": 1}},
            "required": ["score"]
        });
        let r = response(Some(json!({"score": 5})), Some(r#"{"score": 0.4}"#));
        assert_eq!(
            reconcile("judge", &r, Some(&bounded)).unwrap(),
            json!({"score": 0.4})
        );

        let r = response(Some(json!({"score": 5})), None);
        let err = reconcile("judge", &r, Some(&bounded)).unwrap_err();
        assert!(err.to_string().contains("maximum"), "{}", err);
    }

    #[test]
    fn test_error_flag_is_llm_error() {
        let mut r = response(None, Some("rate limited"));
        r.is_error = true;
        let err = reconcile("ask", &r, None).unwrap_err();
        assert_eq!(err.kind_name(), "LLMError");
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_without_schema_returns_text() {
        let r = response(Some(json!({"a": 1})), Some("hello"));
        assert_eq!(reconcile("ask", &r, None).unwrap(), json!("hello"));

        let r = response(Some(json!({"a": 1})), None);
        assert_eq!(reconcile("ask", &r, None).unwrap(), json!(r#"{"a":1}"#));

        assert!(reconcile("ask", &response(None, None), None).is_err());
    }
}

//! Structured output parsing
//!
//! Backends are asked for JSON, but not every provider has a native JSON mode
//! and models still wrap answers in prose or markdown fences. This module
//! locates the JSON payload in a completion, deserializes it into the stage's
//! record type and runs the record's structural validation. Nothing here ever
//! interprets model output as code.
//!
//! Handles these output shapes:
//! 1. Raw JSON (object or array)
//! 2. Fenced JSON, with or without trailing text
//! 3. JSON embedded in prose (first balanced object or array)

use super::{BackendSelection, Gateway, Message};
use sdk::errors::PipelineError;
use sdk::types::Validate;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Ask the gateway for a JSON answer and parse it into a validated record
///
/// `system` sets the stage's role; `prompt` carries the stage inputs.
pub async fn request_record<T>(
    gateway: &Gateway,
    stage: &str,
    system: &str,
    prompt: String,
    selection: &BackendSelection,
) -> Result<T, PipelineError>
where
    T: DeserializeOwned + Validate,
{
    let content = request_raw(gateway, stage, system, prompt, selection, true).await?;
    parse_record(stage, &content)
}

/// Like [`request_record`] for shapes that carry no structural rules
pub async fn request_value<T: DeserializeOwned>(
    gateway: &Gateway,
    stage: &str,
    system: &str,
    prompt: String,
    selection: &BackendSelection,
) -> Result<T, PipelineError> {
    let content = request_raw(gateway, stage, system, prompt, selection, true).await?;
    parse_value(stage, &content)
}

/// Send a two-message conversation and return the raw completion
pub async fn request_raw(
    gateway: &Gateway,
    stage: &str,
    system: &str,
    prompt: String,
    selection: &BackendSelection,
    json_mode: bool,
) -> Result<String, PipelineError> {
    tracing::debug!(
        "{} request via {} ({} prompt chars)",
        stage,
        selection,
        prompt.len()
    );
    let messages = [Message::system(system), Message::user(prompt)];
    gateway.generate(&messages, selection, json_mode).await
}

/// Locate and parse the JSON payload of a completion
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(value);
        }
    }

    let start = trimmed.find(['{', '['])?;
    let candidate = extract_balanced_json(&trimmed[start..])?;
    serde_json::from_str(candidate).ok()
}

/// Parse a completion into `T` without structural validation
pub fn parse_value<T: DeserializeOwned>(stage: &str, content: &str) -> Result<T, PipelineError> {
    let value = extract_json(content)
        .ok_or_else(|| PipelineError::schema(stage, "response contains no JSON payload"))?;
    from_value(stage, value)
}

/// Parse a completion into `T` and validate it
pub fn parse_record<T>(stage: &str, content: &str) -> Result<T, PipelineError>
where
    T: DeserializeOwned + Validate,
{
    let record: T = parse_value(stage, content)?;
    record
        .validate()
        .map_err(|detail| PipelineError::schema(stage, detail))?;
    Ok(record)
}

/// Deserialize an already extracted value into `T`
pub fn from_value<T: DeserializeOwned>(stage: &str, value: Value) -> Result<T, PipelineError> {
    serde_json::from_value(value).map_err(|e| PipelineError::schema(stage, e.to_string()))
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object or array starting at position 0 of `s`.
///
/// Counts bracket depth, respecting string literals, to find the matching
/// close bracket.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with(['{', '[']) {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{Plan, StepResult};
    use serde_json::json;

    #[test]
    fn test_extract_raw_object() {
        let value = extract_json(r#"{"score": 80}"#).unwrap();
        assert_eq!(value, json!({"score": 80}));
    }

    #[test]
    fn test_extract_fenced_with_trailing_text() {
        let content = "Here you go:\n```json\n[{\"action\": \"a\", \"description\": \"b\"}]\n```\nEnjoy!";
        let value = extract_json(content).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn test_extract_embedded_in_prose() {
        let content = r#"Sure! {"decision": "A", "reasoning": "cheaper {really}"} hope that helps"#;
        let value = extract_json(content).unwrap();
        assert_eq!(value["decision"], "A");
        assert_eq!(value["reasoning"], "cheaper {really}");
    }

    #[test]
    fn test_no_json_is_schema_violation() {
        let err = parse_value::<Value>("planner", "I cannot help with that").unwrap_err();
        match err {
            PipelineError::SchemaViolation { stage, .. } => assert_eq!(stage, "planner"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_record_runs_validation() {
        let err = parse_record::<Plan>("planner", "[]").unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_parse_record_rejects_missing_keys() {
        let content = r#"{"result": "ok", "side_effects": "none", "resources_used": "tent"}"#;
        let err = parse_record::<StepResult>("executor", content).unwrap_err();
        assert!(err.to_string().contains("time_taken"));
    }

    #[test]
    fn test_python_literal_is_not_json() {
        // Single-quoted dictionaries are not accepted as structured output
        assert!(extract_json("{'score': 50}").is_none());
    }
}

//! Planner
//!
//! Turns a task into an ordered `Plan` and refines existing plans from
//! feedback. JSON mode forces providers to answer with an object, so the plan
//! may arrive bare or wrapped under `plan` or `steps`.

use crate::llm::structured::{extract_json, from_value};
use crate::llm::{BackendSelection, Gateway, Message};
use sdk::errors::PipelineError;
use sdk::types::{Plan, Validate};
use serde_json::Value;
use std::sync::Arc;

const STAGE: &str = "planner";

const FORMAT_RULES: &str = "Respond with JSON only: an object with a single key \"plan\" whose \
value is an array of steps. Each step is an object with a non-empty \"action\" string and a \
non-empty \"description\" string.\n\n\
Example:\n\
{\"plan\": [{\"action\": \"Step 1\", \"description\": \"Description of step 1\"}, \
{\"action\": \"Step 2\", \"description\": \"Description of step 2\"}]}";

pub struct Planner {
    gateway: Arc<Gateway>,
}

impl Planner {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Generate a plan for a task
    pub async fn create_plan(
        &self,
        task: &str,
        selection: &BackendSelection,
    ) -> Result<Plan, PipelineError> {
        let system = Message::system(
            "You are an AI planner. Your job is to break down tasks into clear, actionable steps.",
        );
        let user = Message::user(format!(
            "Task: {}\n\n\
            Create a detailed step-by-step plan to accomplish this task. Each step should be \
            concise but clear.\n\n{}",
            task, FORMAT_RULES
        ));

        let content = self.gateway.generate(&[system, user], selection, true).await?;
        let plan = parse_plan(&content)?;

        tracing::info!("Planned {} steps", plan.len());
        Ok(plan)
    }

    /// Revise a plan according to feedback, keeping the same format
    pub async fn refine_plan(
        &self,
        plan: &Plan,
        feedback: &str,
        selection: &BackendSelection,
    ) -> Result<Plan, PipelineError> {
        let current = serde_json::to_string(plan)
            .map_err(|e| PipelineError::InvariantViolation(format!("plan not encodable: {}", e)))?;

        let system = Message::system(
            "You are an AI planner. Your job is to refine existing plans based on feedback.",
        );
        let user = Message::user(format!(
            "Current plan: {}\n\nFeedback: {}\n\n\
            Please refine the plan based on the given feedback.\n\n{}",
            current, feedback, FORMAT_RULES
        ));

        let content = self.gateway.generate(&[system, user], selection, true).await?;
        let refined = parse_plan(&content)?;

        tracing::info!("Refined plan from {} to {} steps", plan.len(), refined.len());
        Ok(refined)
    }
}

/// Parse planner output, accepting a bare array or one wrapped under `plan`/`steps`
pub fn parse_plan(content: &str) -> Result<Plan, PipelineError> {
    let value = extract_json(content)
        .ok_or_else(|| PipelineError::schema(STAGE, "response contains no JSON payload"))?;

    let steps = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => ["plan", "steps"]
            .iter()
            .find_map(|key| map.remove(*key).filter(Value::is_array))
            .ok_or_else(|| {
                PipelineError::schema(STAGE, "expected an array of steps under 'plan' or 'steps'")
            })?,
        _ => return Err(PipelineError::schema(STAGE, "expected an array of steps")),
    };

    let plan: Plan = from_value(STAGE, steps)?;
    plan.validate()
        .map_err(|detail| PipelineError::schema(STAGE, detail))?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{groq, scripted_gateway};

    #[test]
    fn test_parse_bare_array() {
        let plan = parse_plan(
            r#"[{"action": "Pick a park", "description": "Choose a nearby park"},
                {"action": "Pack food", "description": "Sandwiches and fruit"}]"#,
        )
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps()[1].action, "Pack food");
    }

    #[test]
    fn test_parse_wrapped_object() {
        let plan = parse_plan(
            r#"{"steps": [{"action": "Invite friends", "description": "Send messages"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_parse_with_markdown_wrapper() {
        let content = "Here is the plan:\n```json\n{\"plan\": [{\"action\": \"Go\", \"description\": \"Leave home\"}]}\n```";
        assert_eq!(parse_plan(content).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_plan_is_schema_violation() {
        let err = parse_plan(r#"{"plan": []}"#).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
    }

    #[test]
    fn test_missing_description_is_schema_violation() {
        let err = parse_plan(r#"[{"action": "Go"}]"#).unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn test_object_without_steps_is_schema_violation() {
        let err = parse_plan(r#"{"result": "I made a plan"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_create_plan_sends_task() {
        let (gateway, provider) = scripted_gateway(&[
            r#"{"plan": [{"action": "Check weather", "description": "Look at the forecast"}]}"#,
        ]);
        let planner = Planner::new(gateway);

        let plan = planner.create_plan("plan a picnic", &groq()).await.unwrap();

        assert_eq!(plan.steps()[0].action, "Check weather");
        assert!(provider.prompt(0).contains("Task: plan a picnic"));
    }

    #[tokio::test]
    async fn test_refine_plan_includes_feedback() {
        let (gateway, provider) = scripted_gateway(&[
            r#"[{"action": "Check weather", "description": "Look at the forecast"},
                {"action": "Bring umbrella", "description": "In case of rain"}]"#,
        ]);
        let planner = Planner::new(gateway);
        let plan = parse_plan(r#"[{"action": "Check weather", "description": "Look"}]"#).unwrap();

        let refined = planner
            .refine_plan(&plan, "prepare for rain", &groq())
            .await
            .unwrap();

        assert_eq!(refined.len(), 2);
        let prompt = provider.prompt(0);
        assert!(prompt.contains("Feedback: prepare for rain"));
        assert!(prompt.contains("Check weather"));
    }
}

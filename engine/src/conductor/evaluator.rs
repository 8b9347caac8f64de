//! Evaluator
//!
//! Scores each executed step, then asks for a narrative over the whole run.
//! The plan score is always the locally computed mean of the step scores;
//! whatever score the narrative call returns is ignored.

use crate::llm::structured::{request_raw, request_record};
use crate::llm::{BackendSelection, Gateway};
use sdk::errors::PipelineError;
use sdk::types::{
    ActionEvaluation, Context, Plan, PlanEvaluation, PlanNarrative, PlanStep, StepResult,
};
use serde_json::json;
use std::sync::Arc;

const STAGE: &str = "evaluator";

pub struct Evaluator {
    gateway: Arc<Gateway>,
}

impl Evaluator {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Score one step and its simulated outcome
    pub async fn evaluate_action(
        &self,
        step: &PlanStep,
        result: &StepResult,
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<ActionEvaluation, PipelineError> {
        let prompt = format!(
            "Action: {}\nResult: {}\nContext: {}\n\n\
            Evaluate the outcome of this action and provide:\n\
            1. A success score (0-100)\n\
            2. Key achievements\n\
            3. Areas for improvement\n\
            4. Unexpected outcomes or surprises\n\
            5. Recommendations for future actions\n\n\
            Respond with a JSON object with keys: 'score' (a number from 0 to 100), \
            'achievements', 'improvements', 'surprises', and 'recommendations'.",
            json!(step),
            json!(result),
            context
        );

        request_record(
            &self.gateway,
            STAGE,
            "You are an AI evaluator. Your job is to assess the outcomes of actions and provide constructive feedback.",
            prompt,
            selection,
        )
        .await
    }

    /// Evaluate a whole run
    ///
    /// # Errors
    /// * `InvariantViolation` - the plan is empty or `results` is not index-aligned with it
    pub async fn evaluate_plan(
        &self,
        plan: &Plan,
        results: &[StepResult],
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<PlanEvaluation, PipelineError> {
        if plan.is_empty() {
            return Err(PipelineError::InvariantViolation(
                "cannot evaluate an empty plan".to_string(),
            ));
        }
        if plan.len() != results.len() {
            return Err(PipelineError::InvariantViolation(format!(
                "plan has {} steps but {} results were supplied",
                plan.len(),
                results.len()
            )));
        }

        let mut evaluations = Vec::with_capacity(results.len());
        for (step, result) in plan.iter().zip(results) {
            evaluations.push(self.evaluate_action(step, result, context, selection).await?);
        }

        let score = PlanEvaluation::mean_score(&evaluations).ok_or_else(|| {
            PipelineError::InvariantViolation("no action evaluations to average".to_string())
        })?;

        let prompt = format!(
            "Plan: {}\nResults: {}\nIndividual Evaluations: {}\nOverall Score: {:.1}\nContext: {}\n\n\
            Provide an overall evaluation of the plan execution:\n\
            1. Summary of key achievements\n\
            2. Major areas for improvement\n\
            3. Lessons learned\n\
            4. Recommendations for future planning and execution\n\n\
            Respond with a JSON object with keys: 'summary', 'improvements', 'lessons', and \
            'recommendations'.",
            json!(plan),
            json!(results),
            json!(evaluations),
            score,
            context
        );

        let narrative: PlanNarrative = request_record(
            &self.gateway,
            STAGE,
            "You are an AI evaluator. Your job is to provide an overall assessment of plan execution and offer strategic insights.",
            prompt,
            selection,
        )
        .await?;

        tracing::info!("Plan scored {:.1} over {} steps", score, evaluations.len());
        Ok(PlanEvaluation::from_parts(narrative, score, evaluations))
    }

    /// Markdown report for an evaluation; free text, not validated
    pub async fn generate_report(
        &self,
        evaluation: &PlanEvaluation,
        selection: &BackendSelection,
    ) -> Result<String, PipelineError> {
        let prompt = format!(
            "Evaluation: {}\n\n\
            Generate a detailed report based on this evaluation. The report should include:\n\
            1. An executive summary\n\
            2. Detailed analysis of each action and its outcome\n\
            3. Overall performance assessment\n\
            4. Key lessons learned\n\
            5. Specific recommendations for improvement\n\
            6. Next steps\n\n\
            Format the report in Markdown.",
            json!(evaluation)
        );

        request_raw(
            &self.gateway,
            "report",
            "You are an AI report generator. Your job is to create clear, insightful reports based on evaluation data.",
            prompt,
            selection,
            false,
        )
        .await
    }
}

//! Reasoner
//!
//! Per-step analysis, weighted multi-criteria decisions and constrained
//! problem solving. Holds no state; every call stands alone.

use crate::llm::structured::{request_record, request_value};
use crate::llm::{BackendSelection, Gateway};
use sdk::errors::PipelineError;
use sdk::types::{Context, Decision, PlanStep, Solution, StepAnalysis};
use std::sync::Arc;

const STAGE: &str = "reasoner";

pub struct Reasoner {
    gateway: Arc<Gateway>,
}

impl Reasoner {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Challenges, resources, alternatives and success criteria for one step
    pub async fn analyze_step(
        &self,
        step: &PlanStep,
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<StepAnalysis, PipelineError> {
        let prompt = format!(
            "Step to analyze: {}\nContext: {}\n\n\
            Analyze this step and provide:\n\
            1. Potential challenges or obstacles\n\
            2. Required resources or information\n\
            3. Alternative approaches\n\
            4. Success criteria\n\n\
            Respond with a JSON object with keys: 'challenges', 'resources', 'alternatives', \
            and 'success_criteria'.",
            serde_json::json!(step),
            context
        );

        request_record(
            &self.gateway,
            STAGE,
            "You are an AI reasoner. Your job is to analyze steps in a plan and provide insights.",
            prompt,
            selection,
        )
        .await
    }

    /// Choose one of `options` under weighted `criteria`
    ///
    /// The chosen option must match one of `options` exactly (after trimming)
    /// and is returned in the caller's spelling.
    pub async fn make_decision(
        &self,
        options: &[String],
        criteria: &[(String, f64)],
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<Decision, PipelineError> {
        if options.is_empty() {
            return Err(PipelineError::InvariantViolation(
                "make_decision needs at least one option".to_string(),
            ));
        }

        let options_list = options
            .iter()
            .map(|o| format!("- {}", o))
            .collect::<Vec<_>>()
            .join("\n");
        let criteria_list = criteria
            .iter()
            .map(|(name, weight)| format!("- {}: {}", name, weight))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Options:\n{}\n\nDecision Criteria (with weights):\n{}\n\nContext: {}\n\n\
            Based on the given options, decision criteria (with their relative importance as \
            weights), and context, choose the best option. Explain your reasoning, showing how \
            you weighted each criterion for each option.\n\n\
            Respond with a JSON object with keys 'decision' (the chosen option, copied exactly \
            from the list) and 'reasoning' (explanation for the decision).",
            options_list, criteria_list, context
        );

        let decision: Decision = request_value(
            &self.gateway,
            STAGE,
            "You are an AI reasoner. Your job is to make decisions based on given criteria and context.",
            prompt,
            selection,
        )
        .await?;

        let chosen = decision.decision.trim();
        let matched = options
            .iter()
            .find(|option| option.trim() == chosen)
            .ok_or_else(|| {
                PipelineError::schema(
                    STAGE,
                    format!("decision '{}' is not one of the offered options", chosen),
                )
            })?;

        Ok(Decision {
            decision: matched.clone(),
            reasoning: decision.reasoning,
        })
    }

    /// Propose a solution that respects `constraints`
    pub async fn solve_problem(
        &self,
        problem: &str,
        constraints: &[String],
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<Solution, PipelineError> {
        let constraints_list = constraints
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Problem: {}\nConstraints:\n{}\nContext: {}\n\n\
            Propose a solution to this problem, taking into account the given constraints and \
            context. Your solution should be creative yet practical.\n\n\
            Respond with a JSON object with keys 'solution' (a brief description of your proposed \
            solution) and 'steps' (a list of strings, the steps to implement the solution).",
            problem, constraints_list, context
        );

        request_record(
            &self.gateway,
            STAGE,
            "You are an AI reasoner. Your job is to solve problems creatively while adhering to given constraints.",
            prompt,
            selection,
        )
        .await
    }
}

//! Executor
//!
//! Simulates each plan step through a backend call and folds the outcome into
//! the run context. Steps run strictly in order; a step whose simulated outcome
//! is negative still counts as executed. Only a backend or parse failure halts
//! the plan, and the halt keeps every result produced before it.

use crate::config::ExecutorConfig;
use crate::llm::structured::request_record;
use crate::llm::{BackendSelection, Gateway};
use rand::Rng;
use sdk::errors::PipelineError;
use sdk::types::{Context, Plan, PlanStep, RecoveryPlan, StepResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STAGE: &str = "executor";

/// Lifecycle of one plan step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A plan stopped at `step` (0-based); results before it are kept
#[derive(Debug, thiserror::Error)]
#[error("execution halted at step {step} ({action}): {cause}")]
pub struct ExecutionHalted {
    pub step: usize,
    pub action: String,
    pub results: Vec<StepResult>,
    pub states: Vec<StepState>,
    pub cause: PipelineError,
}

impl From<ExecutionHalted> for PipelineError {
    fn from(halted: ExecutionHalted) -> Self {
        PipelineError::ExecutionHalted {
            step: halted.step,
            action: halted.action,
            results: halted.results,
            source: Box::new(halted.cause),
        }
    }
}

/// Random pause before each simulated step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedLatency {
    min: Duration,
    max: Duration,
}

impl SimulatedLatency {
    /// Uniform jitter in `[min, max]`; a zero `max` disables it
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn is_disabled(&self) -> bool {
        self.max.is_zero()
    }

    async fn pause(&self) {
        if self.is_disabled() {
            return;
        }
        let millis =
            rand::thread_rng().gen_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

impl From<&ExecutorConfig> for SimulatedLatency {
    fn from(config: &ExecutorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

impl Default for SimulatedLatency {
    fn default() -> Self {
        Self::from(&ExecutorConfig::default())
    }
}

pub struct Executor {
    gateway: Arc<Gateway>,
    latency: SimulatedLatency,
}

impl Executor {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            latency: SimulatedLatency::default(),
        }
    }

    pub fn with_latency(mut self, latency: SimulatedLatency) -> Self {
        self.latency = latency;
        self
    }

    /// Simulate one step
    pub async fn execute_action(
        &self,
        step: &PlanStep,
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<StepResult, PipelineError> {
        self.latency.pause().await;

        let prompt = format!(
            "Action to execute: {}\nContext: {}\n\n\
            Simulate the execution of this action and provide:\n\
            1. The result of the action\n\
            2. Any side effects or unexpected outcomes\n\
            3. Resources used during execution\n\
            4. Time taken to complete (in minutes)\n\n\
            Respond with a JSON object with keys: 'result', 'side_effects', 'resources_used', \
            and 'time_taken' (a number of minutes).",
            json!(step),
            context
        );

        request_record(
            &self.gateway,
            STAGE,
            "You are an AI executor. Your job is to simulate the execution of actions and provide realistic outcomes.",
            prompt,
            selection,
        )
        .await
    }

    /// Run every step in order, updating `context` after each one
    ///
    /// After step `i` the context holds `last_action`, `last_result` and
    /// `resources_used` from that step, and `total_time` grows by its
    /// `time_taken`.
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        context: &mut Context,
        selection: &BackendSelection,
    ) -> Result<Vec<StepResult>, ExecutionHalted> {
        let mut states = vec![StepState::Pending; plan.len()];
        let mut results = Vec::with_capacity(plan.len());

        for (index, step) in plan.iter().enumerate() {
            states[index] = StepState::Running;
            debug!("Executing step {}/{}: {}", index + 1, plan.len(), step.action);

            match self.execute_action(step, context, selection).await {
                Ok(result) => {
                    context.record_step(step, &result);
                    states[index] = StepState::Succeeded;
                    results.push(result);
                }
                Err(cause) => {
                    warn!("Step {} ({}) failed: {}", index + 1, step.action, cause);
                    states[index] = StepState::Failed;
                    return Err(ExecutionHalted {
                        step: index,
                        action: step.action.clone(),
                        results,
                        states,
                        cause,
                    });
                }
            }
        }

        info!(
            "Executed {} steps, total simulated time {:.1} min",
            results.len(),
            context.total_time()
        );
        Ok(results)
    }

    /// Advisory recovery plan for a failure; never acted on automatically
    pub async fn handle_error(
        &self,
        error: &Value,
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<RecoveryPlan, PipelineError> {
        let prompt = format!(
            "Error encountered: {}\nContext: {}\n\n\
            Propose a solution to handle this error. Consider:\n\
            1. The nature of the error\n\
            2. Possible causes\n\
            3. Potential fixes or workarounds\n\
            4. Steps to implement the solution\n\n\
            Respond with a JSON object with keys: 'analysis', 'solution', and \
            'implementation_steps'.",
            error, context
        );

        request_record(
            &self.gateway,
            STAGE,
            "You are an AI error handler. Your job is to analyze errors and propose solutions.",
            prompt,
            selection,
        )
        .await
    }
}

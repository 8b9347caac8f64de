//! Pipeline data model
//!
//! Records exchanged between pipeline stages. Every record that originates from
//! a backend response implements [`Validate`] so a stage can reject malformed
//! output before handing it to the next stage.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Context keys written by the pipeline
pub mod keys {
    /// Backend selector (`groq`, `openai`, `openrouter`, `ollama`)
    pub const API: &str = "api";
    /// Explicit model override
    pub const MODEL: &str = "model";
    /// Memory hits merged before planning
    pub const RELEVANT_INFO: &str = "relevant_info";
    pub const SYNTHESIS: &str = "synthesis";
    /// Running execution state
    pub const LAST_ACTION: &str = "last_action";
    pub const LAST_RESULT: &str = "last_result";
    pub const RESOURCES_USED: &str = "resources_used";
    pub const TOTAL_TIME: &str = "total_time";
}

/// Structural check applied to records parsed from backend output
pub trait Validate {
    /// Returns a human-readable description of the first violation found
    fn validate(&self) -> Result<(), String>;
}

fn require_present(field: &str, value: &Value) -> Result<(), String> {
    if value.is_null() {
        return Err(format!("field '{}' must not be null", field));
    }
    Ok(())
}

/// Mutable key/value state threaded through a single pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Overwrite keys present in `other`; keys absent from `other` are kept
    pub fn merge(&mut self, other: Map<String, Value>) {
        for (key, value) in other {
            self.0.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Accumulated simulated time, 0 when no step has run yet
    pub fn total_time(&self) -> f64 {
        self.0
            .get(keys::TOTAL_TIME)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Fold an executed step into the running execution state
    pub fn record_step(&mut self, step: &PlanStep, result: &StepResult) {
        let total = self.total_time() + result.time_taken;
        self.insert(keys::LAST_ACTION, Value::String(step.action.clone()));
        self.insert(keys::LAST_RESULT, result.result.clone());
        self.insert(keys::RESOURCES_USED, result.resources_used.clone());
        self.insert(keys::TOTAL_TIME, json!(total));
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: String,
    pub description: String,
}

impl PlanStep {
    pub fn new(action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            description: description.into(),
        }
    }
}

impl Validate for PlanStep {
    fn validate(&self) -> Result<(), String> {
        if self.action.trim().is_empty() {
            return Err("step 'action' must be a non-empty string".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("step 'description' must be a non-empty string".to_string());
        }
        Ok(())
    }
}

/// Ordered step sequence; order is execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanStep> {
        self.steps.iter()
    }
}

impl Validate for Plan {
    fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err("plan must contain at least one step".to_string());
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|e| format!("step {}: {}", index + 1, e))?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a PlanStep;
    type IntoIter = std::slice::Iter<'a, PlanStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Simulated outcome of one plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub result: Value,
    pub side_effects: Value,
    pub resources_used: Value,
    /// Simulated duration in minutes
    pub time_taken: f64,
}

impl Validate for StepResult {
    fn validate(&self) -> Result<(), String> {
        require_present("result", &self.result)?;
        if !self.time_taken.is_finite() || self.time_taken < 0.0 {
            return Err(format!(
                "field 'time_taken' must be a non-negative number, got {}",
                self.time_taken
            ));
        }
        Ok(())
    }
}

/// Score and feedback for one (step, result) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvaluation {
    pub score: f64,
    pub achievements: Value,
    pub improvements: Value,
    pub surprises: Value,
    pub recommendations: Value,
}

impl Validate for ActionEvaluation {
    fn validate(&self) -> Result<(), String> {
        if !self.score.is_finite() || !(0.0..=100.0).contains(&self.score) {
            return Err(format!(
                "field 'score' must be within 0-100, got {}",
                self.score
            ));
        }
        require_present("achievements", &self.achievements)?;
        require_present("improvements", &self.improvements)?;
        require_present("recommendations", &self.recommendations)
    }
}

/// Narrative part of a plan evaluation, as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNarrative {
    pub summary: Value,
    pub improvements: Value,
    pub lessons: Value,
    pub recommendations: Value,
}

impl Validate for PlanNarrative {
    fn validate(&self) -> Result<(), String> {
        require_present("summary", &self.summary)?;
        require_present("lessons", &self.lessons)?;
        require_present("recommendations", &self.recommendations)
    }
}

/// Aggregate evaluation of a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEvaluation {
    pub summary: Value,
    pub improvements: Value,
    pub lessons: Value,
    pub recommendations: Value,
    /// Arithmetic mean of `action_evaluations[*].score`
    pub score: f64,
    pub action_evaluations: Vec<ActionEvaluation>,
}

impl PlanEvaluation {
    /// Mean of the per-action scores, `None` for an empty sequence
    pub fn mean_score(evaluations: &[ActionEvaluation]) -> Option<f64> {
        if evaluations.is_empty() {
            return None;
        }
        let total: f64 = evaluations.iter().map(|e| e.score).sum();
        Some(total / evaluations.len() as f64)
    }

    /// Combine a backend narrative with locally computed values
    pub fn from_parts(
        narrative: PlanNarrative,
        score: f64,
        action_evaluations: Vec<ActionEvaluation>,
    ) -> Self {
        Self {
            summary: narrative.summary,
            improvements: narrative.improvements,
            lessons: narrative.lessons,
            recommendations: narrative.recommendations,
            score,
            action_evaluations,
        }
    }
}

/// Advisory analysis of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAnalysis {
    pub challenges: Value,
    pub resources: Value,
    pub alternatives: Value,
    pub success_criteria: Value,
}

impl Validate for StepAnalysis {
    fn validate(&self) -> Result<(), String> {
        require_present("challenges", &self.challenges)?;
        require_present("success_criteria", &self.success_criteria)
    }
}

/// Choice among caller-supplied options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: String,
    pub reasoning: String,
}

/// Proposed solution to a constrained problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub solution: String,
    pub steps: Vec<String>,
}

impl Validate for Solution {
    fn validate(&self) -> Result<(), String> {
        if self.solution.trim().is_empty() {
            return Err("field 'solution' must be a non-empty string".to_string());
        }
        if self.steps.is_empty() {
            return Err("field 'steps' must contain at least one step".to_string());
        }
        Ok(())
    }
}

/// Advisory recovery plan for a failed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub analysis: Value,
    pub solution: Value,
    pub implementation_steps: Value,
}

impl Validate for RecoveryPlan {
    fn validate(&self) -> Result<(), String> {
        require_present("analysis", &self.analysis)?;
        require_present("solution", &self.solution)?;
        require_present("implementation_steps", &self.implementation_steps)
    }
}

/// Memory retrieval result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevantInfo {
    pub relevant_info: Vec<String>,
    pub synthesis: String,
}

impl RelevantInfo {
    /// Context entries to merge before planning
    pub fn into_context_entries(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(keys::RELEVANT_INFO.to_string(), json!(self.relevant_info));
        map.insert(keys::SYNTHESIS.to_string(), Value::String(self.synthesis));
        map
    }
}

/// Performance analysis over past runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    pub success_patterns: Value,
    pub issues: Value,
    pub trends: Value,
    pub improvement_areas: Value,
}

impl Validate for PerformanceAnalysis {
    fn validate(&self) -> Result<(), String> {
        require_present("success_patterns", &self.success_patterns)?;
        require_present("issues", &self.issues)?;
        require_present("improvement_areas", &self.improvement_areas)
    }
}

/// Pipeline component an optimization targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Planning,
    Reasoning,
    Execution,
    Evaluation,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        ComponentKind::Planning,
        ComponentKind::Reasoning,
        ComponentKind::Execution,
        ComponentKind::Evaluation,
    ];

    /// Key under which suggestions for this component are returned
    pub fn suggestions_key(&self) -> &'static str {
        match self {
            ComponentKind::Planning => "planning_suggestions",
            ComponentKind::Reasoning => "reasoning_suggestions",
            ComponentKind::Execution => "execution_suggestions",
            ComponentKind::Evaluation => "evaluation_suggestions",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Planning => write!(f, "planning"),
            ComponentKind::Reasoning => write!(f, "reasoning"),
            ComponentKind::Execution => write!(f, "execution"),
            ComponentKind::Evaluation => write!(f, "evaluation"),
        }
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" => Ok(ComponentKind::Planning),
            "reasoning" => Ok(ComponentKind::Reasoning),
            "execution" => Ok(ComponentKind::Execution),
            "evaluation" => Ok(ComponentKind::Evaluation),
            other => Err(format!("unknown component '{}'", other)),
        }
    }
}

/// A suggestion paired with its expected impact
///
/// Accepted on the wire either as a two-element array `["suggestion", "explanation"]`
/// or as an object with `suggestion` and `explanation` keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub suggestion: String,
    pub explanation: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSuggestion {
    Pair(String, String),
    Named {
        suggestion: String,
        explanation: String,
    },
}

impl<'de> Deserialize<'de> for Suggestion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (suggestion, explanation) = match RawSuggestion::deserialize(deserializer)? {
            RawSuggestion::Pair(s, e) => (s, e),
            RawSuggestion::Named {
                suggestion,
                explanation,
            } => (suggestion, explanation),
        };
        Ok(Self {
            suggestion,
            explanation,
        })
    }
}

/// Suggestions grouped per pipeline component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestions {
    pub planning_suggestions: Vec<Suggestion>,
    pub reasoning_suggestions: Vec<Suggestion>,
    pub execution_suggestions: Vec<Suggestion>,
    pub evaluation_suggestions: Vec<Suggestion>,
}

impl OptimizationSuggestions {
    pub fn for_component(&self, component: ComponentKind) -> &[Suggestion] {
        match component {
            ComponentKind::Planning => &self.planning_suggestions,
            ComponentKind::Reasoning => &self.reasoning_suggestions,
            ComponentKind::Execution => &self.execution_suggestions,
            ComponentKind::Evaluation => &self.evaluation_suggestions,
        }
    }

    pub fn total(&self) -> usize {
        ComponentKind::ALL
            .iter()
            .map(|c| self.for_component(*c).len())
            .sum()
    }
}

impl Validate for OptimizationSuggestions {
    fn validate(&self) -> Result<(), String> {
        for component in ComponentKind::ALL {
            for (index, s) in self.for_component(component).iter().enumerate() {
                if s.suggestion.trim().is_empty() {
                    return Err(format!(
                        "{}[{}] has an empty suggestion",
                        component.suggestions_key(),
                        index
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Descriptive change plan for one suggestion; never applied automatically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub implementation: Value,
    pub impact: Value,
    pub risks: Value,
}

impl Validate for ChangeDescriptor {
    fn validate(&self) -> Result<(), String> {
        require_present("implementation", &self.implementation)?;
        require_present("impact", &self.impact)
    }
}

/// One completed run as handed to memory summarization
#[derive(Debug, Clone, Serialize)]
pub struct Episode<'a> {
    pub task: &'a str,
    pub plan: &'a Plan,
    pub results: &'a [StepResult],
    pub evaluation: &'a PlanEvaluation,
}

/// Record appended to the task history after every completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistoryRecord {
    pub task: String,
    pub evaluation: PlanEvaluation,
    pub context: Context,
}

/// Inbound pipeline request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub context: Context,
}

impl TaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Composed result of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task: String,
    pub plan: Plan,
    pub results: Vec<StepResult>,
    pub evaluation: PlanEvaluation,
}

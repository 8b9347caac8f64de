//! Cadence SDK
//!
//! Shared data model and error taxonomy for the Cadence task pipeline.
//! This crate is used by the engine and by anything embedding the pipeline.

/// Error types and handling
pub mod errors;

/// Pipeline records and the run context
pub mod types;

// Re-export commonly used types
pub use errors::{BackendAttempt, ErrorClass, PipelineError, PipelineErrorExt};
pub use types::{
    ActionEvaluation, ChangeDescriptor, ComponentKind, Context, Decision, Episode,
    OptimizationSuggestions, PerformanceAnalysis, Plan, PlanEvaluation, PlanNarrative, PlanStep,
    RecoveryPlan, RelevantInfo, Solution, StepAnalysis, StepResult, Suggestion, TaskHistoryRecord,
    TaskOutcome, TaskRequest, Validate,
};

//! Error types and handling
//!
//! This module provides the error taxonomy shared by every pipeline stage.
//! All errors implement the `PipelineErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Error Classes
//!
//! - **Configuration**: invalid backend or model selector, missing credentials
//! - **Backend exhaustion**: every candidate model of a backend failed
//! - **Schema violation**: a backend response did not match the stage's record shape
//! - **Invariant violation**: a cross-stage contract was broken by the caller
//! - **Persistence**: the long-term memory store could not be read or written
//!
//! Individual provider failures never appear here; the gateway absorbs them
//! into candidate failover and only reports exhaustion.

use crate::types::StepResult;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Trait for pipeline error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information.
pub trait PipelineErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint never contains API keys or raw provider payloads.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors may succeed when the same request is submitted again
    /// (for example a backend that was briefly unavailable). Non-recoverable
    /// errors require the caller to change the request or the configuration.
    fn is_recoverable(&self) -> bool;
}

/// Coarse classification used by callers to tell failure kinds apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Configuration,
    BackendExhausted,
    SchemaViolation,
    InvariantViolation,
    Persistence,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Configuration => write!(f, "configuration"),
            ErrorClass::BackendExhausted => write!(f, "backend_exhausted"),
            ErrorClass::SchemaViolation => write!(f, "schema_violation"),
            ErrorClass::InvariantViolation => write!(f, "invariant_violation"),
            ErrorClass::Persistence => write!(f, "persistence"),
        }
    }
}

/// One failed attempt against a candidate model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendAttempt {
    /// Model identifier that was tried
    pub model: String,

    /// Provider error, already scrubbed of credentials
    pub error: String,
}

impl BackendAttempt {
    pub fn new(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            error: error.into(),
        }
    }
}

/// Main pipeline error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{ErrorClass, PipelineError, PipelineErrorExt};
///
/// let error = PipelineError::schema("planner", "plan must contain at least one step");
/// assert_eq!(error.class(), ErrorClass::SchemaViolation);
/// assert!(error.is_recoverable());
///
/// let fatal = PipelineError::Configuration("unknown backend 'foo'".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("All candidate models failed for backend '{backend}' ({count} attempts)", count = .attempts.len())]
    BackendExhausted {
        backend: String,
        attempts: Vec<BackendAttempt>,
    },

    #[error("Schema violation in {stage}: {detail}")]
    SchemaViolation { stage: String, detail: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Execution stopped at `step` (0-based); `results` holds every step
    /// result produced before it
    #[error("Execution halted at step {step} ({action}) after {count} completed steps: {source}", count = .results.len())]
    ExecutionHalted {
        step: usize,
        action: String,
        results: Vec<StepResult>,
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Build a schema violation for the named stage
    pub fn schema(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    /// Classify the error; halted executions report the class of their cause
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::BackendExhausted { .. } => ErrorClass::BackendExhausted,
            Self::SchemaViolation { .. } => ErrorClass::SchemaViolation,
            Self::InvariantViolation(_) => ErrorClass::InvariantViolation,
            Self::Persistence(_) => ErrorClass::Persistence,
            Self::ExecutionHalted { source, .. } => source.class(),
        }
    }

    /// Step results completed before the failure; empty unless execution halted
    pub fn partial_results(&self) -> &[StepResult] {
        match self {
            Self::ExecutionHalted { results, .. } => results,
            _ => &[],
        }
    }

    /// Structured description of the failure, suitable as a recovery prompt input
    pub fn describe(&self) -> Value {
        let mut description = json!({
            "class": self.class(),
            "error": self.to_string(),
        });
        if let (Self::ExecutionHalted { step, action, results, .. }, Value::Object(map)) =
            (self, &mut description)
        {
            map.insert("step".to_string(), json!(step));
            map.insert("action".to_string(), json!(action));
            map.insert("completed_steps".to_string(), json!(results.len()));
        }
        description
    }
}

impl PipelineErrorExt for PipelineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Configuration(_) => "Check the selected backend, model and API key variables",
            Self::BackendExhausted { .. } => {
                "No model of the selected backend answered. Check your network and API keys"
            }
            Self::SchemaViolation { .. } => {
                "The model returned output in an unexpected shape. Try again or pick another model"
            }
            Self::InvariantViolation(_) => "The request was internally inconsistent",
            Self::Persistence(_) => "Memory storage failed. Check the data directory",
            Self::ExecutionHalted { source, .. } => source.user_hint(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::InvariantViolation(_) => false,
            Self::ExecutionHalted { source, .. } => source.is_recoverable(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_counts_attempts() {
        let err = PipelineError::BackendExhausted {
            backend: "groq".to_string(),
            attempts: vec![
                BackendAttempt::new("m1", "timeout"),
                BackendAttempt::new("m2", "HTTP 500"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "All candidate models failed for backend 'groq' (2 attempts)"
        );
        assert_eq!(err.class(), ErrorClass::BackendExhausted);
    }

    #[test]
    fn test_halted_execution_inherits_class() {
        let err = PipelineError::ExecutionHalted {
            step: 1,
            action: "Pack food".to_string(),
            results: vec![StepResult {
                result: json!("Found a park"),
                side_effects: json!("none"),
                resources_used: json!([]),
                time_taken: 10.0,
            }],
            source: Box::new(PipelineError::schema("executor", "missing 'time_taken'")),
        };
        assert_eq!(err.class(), ErrorClass::SchemaViolation);
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("missing 'time_taken'"));
        assert_eq!(err.partial_results().len(), 1);

        let description = err.describe();
        assert_eq!(description["step"], json!(1));
        assert_eq!(description["action"], json!("Pack food"));
        assert_eq!(description["completed_steps"], json!(1));
        assert_eq!(description["class"], json!("schema_violation"));
    }

    #[test]
    fn test_describe_without_halt_has_no_step() {
        let err = PipelineError::Persistence("disk full".to_string());
        let description = err.describe();
        assert!(description.get("step").is_none());
        assert!(err.partial_results().is_empty());
    }

    #[test]
    fn test_configuration_is_not_recoverable() {
        let err = PipelineError::Configuration("bad".to_string());
        assert!(!err.is_recoverable());
        assert_eq!(err.class().to_string(), "configuration");
    }
}

//! Conductor
//!
//! The pipeline stages and the controller that chains them for each task.

pub mod evaluator;
pub mod executor;
pub mod optimizer;
pub mod pipeline;
pub mod planner;
pub mod reasoner;

pub use evaluator::Evaluator;
pub use executor::{ExecutionHalted, Executor, SimulatedLatency, StepState};
pub use optimizer::{ComponentOptimization, OptimizationReport, Optimizer};
pub use pipeline::{TaskHistory, TaskPipeline};
pub use planner::Planner;
pub use reasoner::Reasoner;

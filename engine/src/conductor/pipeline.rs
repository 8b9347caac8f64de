//! Task Pipeline
//!
//! Drives one task through every stage:
//!
//! 1. Resolve the backend selection from the request context
//! 2. Optimize from past runs (only when there are any)
//! 3. Merge relevant memory into the context
//! 4. Plan, execute, evaluate
//! 5. Summarize the episode into long-term memory
//! 6. Clear the run's short-term memory and record the run in the task history
//!
//! Each run owns its short-term scratch; only long-term memory and the task
//! history are shared between concurrent runs. Any stage error aborts the run.
//! The scratch is still cleared, but no history record is written and the typed
//! error is returned unchanged.

use super::evaluator::Evaluator;
use super::executor::{Executor, SimulatedLatency};
use super::optimizer::Optimizer;
use super::planner::Planner;
use crate::config::Config;
use crate::llm::{Backend, BackendSelection, Gateway};
use crate::memory::{open_store, Memory, ShortTermMemory, SnapshotLimits};
use sdk::errors::PipelineError;
use sdk::types::{Episode, TaskHistoryRecord, TaskOutcome, TaskRequest};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

/// Append-only record of completed runs, bounded to the newest `max_records`
pub struct TaskHistory {
    records: RwLock<VecDeque<TaskHistoryRecord>>,
    max_records: usize,
}

impl TaskHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    pub async fn append(&self, record: TaskHistoryRecord) {
        let mut records = self.records.write().await;
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
    }

    /// Oldest first
    pub async fn records(&self) -> Vec<TaskHistoryRecord> {
        self.records.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Wires the stages together; shared across concurrent runs through `Arc`
pub struct TaskPipeline {
    gateway: Arc<Gateway>,
    memory: Arc<Memory>,
    planner: Planner,
    executor: Executor,
    evaluator: Evaluator,
    optimizer: Optimizer,
    history: Arc<TaskHistory>,
    default_backend: Backend,
    optimizer_enabled: bool,
}

impl TaskPipeline {
    pub fn new(gateway: Arc<Gateway>, memory: Arc<Memory>, history: Arc<TaskHistory>) -> Self {
        Self {
            planner: Planner::new(Arc::clone(&gateway)),
            executor: Executor::new(Arc::clone(&gateway)),
            evaluator: Evaluator::new(Arc::clone(&gateway)),
            optimizer: Optimizer::new(Arc::clone(&gateway)),
            gateway,
            memory,
            history,
            default_backend: Backend::Groq,
            optimizer_enabled: true,
        }
    }

    /// Build the gateway, memory store and history described by `config`
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let gateway = Arc::new(Gateway::from_config(&config.llm));
        let store = open_store(config).await?;
        let memory = Memory::load(
            Arc::clone(&gateway),
            store,
            SnapshotLimits::from(&config.memory),
        )
        .await?;
        let history = Arc::new(TaskHistory::new(config.history.max_records));

        Ok(Self::new(gateway, Arc::new(memory), history)
            .with_default_backend(config.llm.default_backend)
            .with_optimizer(config.optimizer.enabled)
            .with_latency(SimulatedLatency::from(&config.executor))
            .with_analysis_window(config.history.analysis_window))
    }

    pub fn with_default_backend(mut self, backend: Backend) -> Self {
        self.default_backend = backend;
        self
    }

    pub fn with_optimizer(mut self, enabled: bool) -> Self {
        self.optimizer_enabled = enabled;
        self
    }

    pub fn with_latency(mut self, latency: SimulatedLatency) -> Self {
        self.executor = self.executor.with_latency(latency);
        self
    }

    pub fn with_analysis_window(mut self, window: usize) -> Self {
        self.optimizer = self.optimizer.with_window(window);
        self
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    pub fn default_backend(&self) -> Backend {
        self.default_backend
    }

    /// Completed runs, oldest first
    pub async fn history(&self) -> Vec<TaskHistoryRecord> {
        self.history.records().await
    }

    /// Run one task end to end
    pub async fn run_task(&self, request: TaskRequest) -> Result<TaskOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", id = %run_id);

        async move {
            let start = Instant::now();
            info!("Starting task: {}", request.task);

            let mut short_term = ShortTermMemory::new();
            let result = self.run_stages(request, &mut short_term).await;
            short_term.clear();

            match result {
                Ok((outcome, record)) => {
                    self.history.append(record).await;
                    info!(
                        "Task completed in {}ms, score {:.1}",
                        start.elapsed().as_millis(),
                        outcome.evaluation.score
                    );
                    Ok(outcome)
                }
                Err(e) => {
                    error!("Task aborted ({}): {}", e.class(), e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        request: TaskRequest,
        short_term: &mut ShortTermMemory,
    ) -> Result<(TaskOutcome, TaskHistoryRecord), PipelineError> {
        let TaskRequest { task, mut context } = request;

        let selection = BackendSelection::from_context(&context, self.default_backend)?;
        // Rejects unknown backends and models before anything is sent
        self.gateway.candidates(&selection)?;
        debug!("Using {}", selection);
        short_term.put("current_task", json!(task));
        short_term.put("backend", json!(selection.to_string()));

        if self.optimizer_enabled {
            let history = self.history.records().await;
            if !history.is_empty() {
                let report = self
                    .optimizer
                    .optimize_all_components(&history, &task, &context, &selection)
                    .await?;
                info!(
                    "Optimizer produced {} advisory suggestions from {} past runs",
                    report.suggestion_count(),
                    history.len()
                );
                debug!(
                    "Optimization report: {}",
                    serde_json::to_string(&report).unwrap_or_default()
                );
            }
        }

        let relevant = self
            .memory
            .retrieve_relevant_info(&task, &context, short_term, &selection)
            .await?;
        context.merge(relevant.into_context_entries());

        let plan = self.planner.create_plan(&task, &selection).await?;
        let results = self
            .executor
            .execute_plan(&plan, &mut context, &selection)
            .await?;
        let evaluation = self
            .evaluator
            .evaluate_plan(&plan, &results, &context, &selection)
            .await?;

        let episode = Episode {
            task: &task,
            plan: &plan,
            results: &results,
            evaluation: &evaluation,
        };
        self.memory
            .summarize_and_store(&episode, &context, &selection)
            .await?;

        let record = TaskHistoryRecord {
            task: task.clone(),
            evaluation: evaluation.clone(),
            context,
        };
        let outcome = TaskOutcome {
            task,
            plan,
            results,
            evaluation,
        };
        Ok((outcome, record))
    }
}

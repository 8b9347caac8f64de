//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Run one task through the full pipeline
//! - batch: Run many tasks concurrently and print the task history
//! - plan / refine: Planner only
//! - decide / solve: Reasoner only
//! - memory list / get: Inspect long-term memory
//! - backends: List backends, check their health, or compare their answers to one prompt

use anyhow::{Context as _, Result};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

use crate::cli::BackendArgs;
use crate::conductor::{
    planner::parse_plan, Evaluator, Executor, Planner, Reasoner, TaskPipeline,
};
use crate::config::Config;
use crate::llm::{Backend, BackendSelection, Gateway, Message};
use crate::memory::{open_store, Memory, SnapshotLimits};
use sdk::errors::{PipelineError, PipelineErrorExt};
use sdk::types::{keys, Context, RecoveryPlan, TaskOutcome, TaskRequest};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run a task through the full pipeline
pub async fn handle_run(
    task: String,
    backend: BackendArgs,
    context: Option<String>,
    report: bool,
    recover: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let context = build_context(context.as_deref(), &backend)?;
    let selection = BackendSelection::from_context(&context, config.llm.default_backend)?;
    let pipeline = TaskPipeline::from_config(config)
        .await
        .context("Failed to initialize task pipeline")?;

    if let OutputFormat::Text = format {
        println!("Running task: {}", task);
        println!();
    }

    let outcome = match pipeline
        .run_task(TaskRequest::new(task).with_context(context.clone()))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let recovery = if recover {
                let executor = Executor::new(Arc::clone(pipeline.gateway()));
                match executor.handle_error(&e.describe(), &context, &selection).await {
                    Ok(plan) => Some(plan),
                    Err(advice_error) => {
                        tracing::warn!("No recovery plan available: {}", advice_error);
                        None
                    }
                }
            } else {
                None
            };
            print_failure(&e, recovery.as_ref(), format)?;
            return Err(e.into());
        }
    };

    let report = if report {
        let evaluator = Evaluator::new(Arc::clone(pipeline.gateway()));
        Some(
            evaluator
                .generate_report(&outcome.evaluation, &selection)
                .await
                .context("Failed to generate report")?,
        )
    } else {
        None
    };

    match format {
        OutputFormat::Text => {
            print_outcome(&outcome);
            if let Some(report) = report {
                println!();
                println!("{}", report);
            }
        }
        OutputFormat::Json => {
            let mut output = serde_json::to_value(&outcome)?;
            if let (Some(report), Value::Object(map)) = (report, &mut output) {
                map.insert("report".to_string(), Value::String(report));
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Run every task in a file concurrently
pub async fn handle_batch(
    file: &Path,
    backend: BackendArgs,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read task file {:?}", file))?;
    let tasks = parse_task_lines(&contents);
    if tasks.is_empty() {
        anyhow::bail!("No tasks found in {:?}", file);
    }

    let context = build_context(None, &backend)?;
    let pipeline = Arc::new(
        TaskPipeline::from_config(config)
            .await
            .context("Failed to initialize task pipeline")?,
    );

    tracing::info!("Running {} tasks concurrently", tasks.len());
    let runs = tasks.iter().map(|task| {
        let pipeline = Arc::clone(&pipeline);
        let request = TaskRequest::new(task.clone()).with_context(context.clone());
        async move { pipeline.run_task(request).await }
    });
    let results = join_all(runs).await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    let history = pipeline.history().await;

    match format {
        OutputFormat::Text => {
            for (task, result) in tasks.iter().zip(&results) {
                match result {
                    Ok(outcome) => println!(
                        "✓ {} (score {:.1}, {} steps)",
                        task,
                        outcome.evaluation.score,
                        outcome.plan.len()
                    ),
                    Err(e) => println!("✗ {}: {}", task, e),
                }
            }
            println!();
            println!("Task History ({} runs):", history.len());
            for record in &history {
                println!(
                    "  {} - score {:.1}, {:.1} min",
                    record.task,
                    record.evaluation.score,
                    record.context.total_time()
                );
            }
        }
        OutputFormat::Json => {
            let runs: Vec<Value> = tasks
                .iter()
                .zip(&results)
                .map(|(task, result)| match result {
                    Ok(outcome) => json!({"task": task, "status": "completed", "outcome": outcome}),
                    Err(e) => json!({
                        "task": task,
                        "status": "failed",
                        "error": e.to_string(),
                        "class": e.class(),
                        "partial_results": e.partial_results(),
                    }),
                })
                .collect();
            let output = json!({
                "runs": runs,
                "failed": failed,
                "task_history": history,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} tasks failed", failed, tasks.len());
    }
    Ok(())
}

/// Create a plan without executing it
pub async fn handle_plan(
    task: String,
    backend: BackendArgs,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let selection = resolve_selection(&backend, config)?;
    let planner = Planner::new(Arc::new(Gateway::from_config(&config.llm)));

    let plan = planner.create_plan(&task, &selection).await?;

    match format {
        OutputFormat::Text => {
            println!("Plan for: {}", task);
            for (i, step) in plan.iter().enumerate() {
                println!("  {}. {}: {}", i + 1, step.action, step.description);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
    }
    Ok(())
}

/// Refine a saved plan using feedback
pub async fn handle_refine(
    plan_file: &Path,
    feedback: String,
    backend: BackendArgs,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(plan_file)
        .await
        .with_context(|| format!("Failed to read plan file {:?}", plan_file))?;
    let plan = parse_plan(&raw).with_context(|| format!("Invalid plan in {:?}", plan_file))?;

    let selection = resolve_selection(&backend, config)?;
    let planner = Planner::new(Arc::new(Gateway::from_config(&config.llm)));
    let refined = planner.refine_plan(&plan, &feedback, &selection).await?;

    match format {
        OutputFormat::Text => {
            println!("Refined plan ({} -> {} steps):", plan.len(), refined.len());
            for (i, step) in refined.iter().enumerate() {
                println!("  {}. {}: {}", i + 1, step.action, step.description);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&refined)?),
    }
    Ok(())
}

/// Choose between options under weighted criteria
pub async fn handle_decide(
    options: Vec<String>,
    criteria: Vec<(String, f64)>,
    context: Option<String>,
    backend: BackendArgs,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let context = build_context(context.as_deref(), &backend)?;
    let selection = BackendSelection::from_context(&context, config.llm.default_backend)?;
    let reasoner = Reasoner::new(Arc::new(Gateway::from_config(&config.llm)));

    let decision = reasoner
        .make_decision(&options, &criteria, &context, &selection)
        .await?;

    match format {
        OutputFormat::Text => {
            println!("Decision: {}", decision.decision);
            println!();
            println!("{}", decision.reasoning);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&decision)?),
    }
    Ok(())
}

/// Propose a solution under constraints
pub async fn handle_solve(
    problem: String,
    constraints: Vec<String>,
    backend: BackendArgs,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let context = build_context(None, &backend)?;
    let selection = BackendSelection::from_context(&context, config.llm.default_backend)?;
    let reasoner = Reasoner::new(Arc::new(Gateway::from_config(&config.llm)));

    let solution = reasoner
        .solve_problem(&problem, &constraints, &context, &selection)
        .await?;

    match format {
        OutputFormat::Text => {
            println!("Solution: {}", solution.solution);
            println!();
            println!("Steps:");
            for (i, step) in solution.steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&solution)?),
    }
    Ok(())
}

/// List long-term memory categories, most recent first
pub async fn handle_memory_list(config: &Config, format: OutputFormat) -> Result<()> {
    let memory = open_memory(config).await?;
    let mut entries = memory.long_term_entries().await;
    entries.reverse();

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("Long-term memory is empty");
                return Ok(());
            }

            println!("Long-term memory ({} categories):", entries.len());
            for entry in &entries {
                println!("  {} (updated {})", entry.key, format_updated(entry.updated_at));
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "entries": entries,
                "count": entries.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Show one long-term memory category
pub async fn handle_memory_get(key: String, config: &Config, format: OutputFormat) -> Result<()> {
    let memory = open_memory(config).await?;
    let value = memory
        .get_long_term(&key)
        .await
        .ok_or_else(|| anyhow::anyhow!("No memory stored under '{}'", key))?;

    match format {
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(&value)?),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({"key": key, "value": value}))?
            )
        }
    }
    Ok(())
}

/// List backends, optionally probing each configured one
pub async fn handle_backends(check: bool, config: &Config, format: OutputFormat) -> Result<()> {
    let gateway = Gateway::from_config(&config.llm);
    let backends = gateway.backends();
    let health = if check {
        gateway.check_health().await
    } else {
        Vec::new()
    };
    let health_of = |backend: Backend| {
        health
            .iter()
            .find(|(b, _)| *b == backend)
            .map(|(_, healthy)| *healthy)
    };

    match format {
        OutputFormat::Text => {
            for info in &backends {
                let default_marker = if info.backend == config.llm.default_backend {
                    " (default)"
                } else {
                    ""
                };
                let status = match (info.configured, health_of(info.backend)) {
                    (false, _) => "not configured",
                    (true, Some(true)) => "reachable",
                    (true, Some(false)) => "unreachable",
                    (true, None) => "configured",
                };
                println!("{}{}: {}", info.backend, default_marker, status);
                println!("  Timeout: {}s", info.timeout_secs);
                for model in &info.models {
                    println!("  - {}", model);
                }
            }
        }
        OutputFormat::Json => {
            let entries: Vec<Value> = backends
                .iter()
                .map(|info| {
                    let mut entry = serde_json::to_value(info).unwrap_or(Value::Null);
                    if let (Some(healthy), Value::Object(map)) =
                        (health_of(info.backend), &mut entry)
                    {
                        map.insert("healthy".to_string(), Value::Bool(healthy));
                    }
                    entry
                })
                .collect();
            let output = json!({
                "default_backend": config.llm.default_backend,
                "backends": entries,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Send one prompt to every configured backend and show each answer
pub async fn handle_compare(
    prompt: String,
    reasoning: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let gateway = Gateway::from_config(&config.llm);
    let messages = vec![Message::user(compare_prompt(&prompt, reasoning.as_deref()))];

    let answers = gateway.compare(&messages, false).await;
    if answers.is_empty() {
        anyhow::bail!("No backend is configured; set an API key or start Ollama");
    }

    match format {
        OutputFormat::Text => {
            for (backend, answer) in &answers {
                println!("{} response:", backend);
                match answer {
                    Ok(text) => println!("{}", text),
                    Err(e) => println!("✗ {}", e),
                }
                println!();
            }
        }
        OutputFormat::Json => {
            let entries: Vec<Value> = answers
                .iter()
                .map(|(backend, answer)| match answer {
                    Ok(text) => json!({"backend": backend, "response": text}),
                    Err(e) => json!({"backend": backend, "error": e.to_string(), "class": e.class()}),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json!({"responses": entries}))?);
        }
    }
    Ok(())
}

/// The compared prompt, with optional reasoning instructions after a blank line
fn compare_prompt(prompt: &str, reasoning: Option<&str>) -> String {
    match reasoning {
        Some(reasoning) => format!("{}\n\n{}", prompt, reasoning),
        None => prompt.to_string(),
    }
}

/// Render a Unix-milliseconds write time; 0 means unknown
fn format_updated(updated_at: i64) -> String {
    if updated_at <= 0 {
        return "Unknown".to_string();
    }
    chrono::DateTime::from_timestamp_millis(updated_at)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Context from an optional JSON object plus `--api`/`--model` overrides
fn build_context(raw: Option<&str>, backend: &BackendArgs) -> Result<Context> {
    let mut context = match raw {
        Some(raw) => {
            let map: Map<String, Value> =
                serde_json::from_str(raw).context("--context must be a JSON object")?;
            Context::from(map)
        }
        None => Context::new(),
    };

    if let Some(api) = &backend.api {
        context.insert(keys::API, Value::String(api.clone()));
    }
    if let Some(model) = &backend.model {
        context.insert(keys::MODEL, Value::String(model.clone()));
    }
    Ok(context)
}

fn resolve_selection(backend: &BackendArgs, config: &Config) -> Result<BackendSelection> {
    let context = build_context(None, backend)?;
    Ok(BackendSelection::from_context(
        &context,
        config.llm.default_backend,
    )?)
}

async fn open_memory(config: &Config) -> Result<Memory> {
    let gateway = Arc::new(Gateway::from_config(&config.llm));
    let store = open_store(config)
        .await
        .context("Failed to open long-term memory store")?;
    Ok(Memory::load(gateway, store, SnapshotLimits::from(&config.memory)).await?)
}

/// Non-empty, non-comment lines, trimmed
fn parse_task_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_outcome(outcome: &TaskOutcome) {
    println!("Plan:");
    for (i, (step, result)) in outcome.plan.iter().zip(&outcome.results).enumerate() {
        println!("  {}. {}", i + 1, step.action);
        println!("     {}", display_value(&result.result));
        println!("     ({:.1} min)", result.time_taken);
    }
    println!();
    println!("✓ Task completed");
    println!("  Score: {:.1}", outcome.evaluation.score);
    println!("  Summary: {}", display_value(&outcome.evaluation.summary));
}

fn failure_json(error: &PipelineError, recovery: Option<&RecoveryPlan>) -> Value {
    let mut output = json!({
        "status": "failed",
        "class": error.class(),
        "error": error.to_string(),
        "hint": error.user_hint(),
        "recoverable": error.is_recoverable(),
        "partial_results": error.partial_results(),
    });
    if let (Some(recovery), Value::Object(map)) = (recovery, &mut output) {
        map.insert("recovery".to_string(), json!(recovery));
    }
    output
}

fn print_failure(
    error: &PipelineError,
    recovery: Option<&RecoveryPlan>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let partial = error.partial_results();
            if !partial.is_empty() {
                println!("Completed before the failure:");
                for (i, result) in partial.iter().enumerate() {
                    println!("  {}. {}", i + 1, display_value(&result.result));
                    println!("     ({:.1} min)", result.time_taken);
                }
                println!();
            }
            println!("✗ Task failed: {}", error);
            println!("  Hint: {}", error.user_hint());
            if let Some(recovery) = recovery {
                println!();
                println!("Recovery plan (advisory):");
                println!("  Analysis: {}", display_value(&recovery.analysis));
                println!("  Solution: {}", display_value(&recovery.solution));
                println!("  Steps: {}", display_value(&recovery.implementation_steps));
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&failure_json(error, recovery))?
            );
        }
    }
    Ok(())
}

// Cadence task pipeline
// Main entry point for the cadence binary

use clap::Parser;
use cadence_engine::cli::{Cli, Command, MemoryAction};
use cadence_engine::config::Config;
use cadence_engine::handlers::{
    handle_backends, handle_batch, handle_compare, handle_decide, handle_memory_get,
    handle_memory_list, handle_plan, handle_refine, handle_run, handle_solve, OutputFormat,
};
use cadence_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config level; RUST_LOG still wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("Cadence v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Run {
            task,
            backend,
            context,
            report,
            recover,
        } => handle_run(task, backend, context, report, recover, &config, format).await,

        Command::Batch { file, backend } => handle_batch(&file, backend, &config, format).await,

        Command::Plan { task, backend } => handle_plan(task, backend, &config, format).await,

        Command::Refine {
            plan,
            feedback,
            backend,
        } => handle_refine(&plan, feedback, backend, &config, format).await,

        Command::Decide {
            options,
            criteria,
            context,
            backend,
        } => handle_decide(options, criteria, context, backend, &config, format).await,

        Command::Solve {
            problem,
            constraints,
            backend,
        } => handle_solve(problem, constraints, backend, &config, format).await,

        Command::Memory { action } => match action {
            MemoryAction::List => handle_memory_list(&config, format).await,
            MemoryAction::Get { key } => handle_memory_get(key, &config, format).await,
        },

        Command::Backends {
            compare: Some(prompt),
            reasoning,
            ..
        } => handle_compare(prompt, reasoning, &config, format).await,

        Command::Backends { check, .. } => handle_backends(check, &config, format).await,
    }
}

//! CLI interface for Cadence
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving the task pipeline.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Cadence task pipeline
///
/// Breaks a task into steps, simulates and scores each one through a
/// text-generation backend, and remembers what it learned for later tasks.
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Backend override shared by every command that calls a backend
#[derive(Args, Debug, Clone, Default)]
pub struct BackendArgs {
    /// Backend to use (groq, openai, openrouter, ollama)
    #[arg(long, value_name = "BACKEND")]
    pub api: Option<String>,

    /// Preferred model; must be one of the backend's configured models
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a task through the full pipeline
    Run {
        /// The task to run
        task: String,

        #[command(flatten)]
        backend: BackendArgs,

        /// Initial context as a JSON object
        #[arg(long, value_name = "JSON")]
        context: Option<String>,

        /// Also generate a Markdown report of the evaluation
        #[arg(long)]
        report: bool,

        /// On failure, ask the backend for an advisory recovery plan
        #[arg(long)]
        recover: bool,
    },

    /// Run every task in a file concurrently, one task per line
    Batch {
        /// File with one task per line; blank lines and lines starting with '#' are skipped
        file: PathBuf,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Create a plan without executing it
    Plan {
        /// The task to plan
        task: String,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Refine a saved plan using feedback
    Refine {
        /// Plan file (JSON array of steps, or an object with a "plan" array)
        plan: PathBuf,

        /// What should change
        feedback: String,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Choose between options under weighted criteria
    Decide {
        /// Candidate option (repeatable)
        #[arg(long = "option", value_name = "OPTION", required = true)]
        options: Vec<String>,

        /// Criterion with weight, as name=weight (repeatable)
        #[arg(long = "criterion", value_name = "NAME=WEIGHT", value_parser = parse_criterion)]
        criteria: Vec<(String, f64)>,

        /// Context as a JSON object
        #[arg(long, value_name = "JSON")]
        context: Option<String>,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Propose a solution to a problem under constraints
    Solve {
        /// The problem to solve
        problem: String,

        /// Constraint the solution must respect (repeatable)
        #[arg(long = "constraint", value_name = "TEXT")]
        constraints: Vec<String>,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Inspect long-term memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// List configured backends and their candidate models
    Backends {
        /// Also check the health of each configured backend
        #[arg(long)]
        check: bool,

        /// Send this prompt to every configured backend and show each answer
        #[arg(long, value_name = "PROMPT", conflicts_with = "check")]
        compare: Option<String>,

        /// Extra reasoning instructions appended to the compared prompt
        #[arg(long, value_name = "TEXT", requires = "compare")]
        reasoning: Option<String>,
    },
}

/// Long-term memory actions
#[derive(Subcommand, Debug)]
pub enum MemoryAction {
    /// List stored categories, most recently written first
    List,

    /// Show one stored category
    Get {
        /// Category key
        key: String,
    },
}

/// Parse `name=weight` into a weighted criterion
pub fn parse_criterion(raw: &str) -> Result<(String, f64), String> {
    let (name, weight) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=WEIGHT, got '{}'", raw))?;

    let name = name.trim();
    if name.is_empty() {
        return Err("criterion name cannot be empty".to_string());
    }

    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|_| format!("weight '{}' is not a number", weight.trim()))?;
    if !weight.is_finite() || weight < 0.0 {
        return Err(format!("weight for '{}' must be a non-negative number", name));
    }

    Ok((name.to_string(), weight))
}

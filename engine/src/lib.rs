//! Cadence Engine Library
//!
//! This library provides the task pipeline, its backends and its memory.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Secret handling module
pub mod secrets;

/// Database persistence module
pub mod db;

/// Text-generation backend gateway
pub mod llm;

/// Short- and long-term memory
pub mod memory;

/// Pipeline stages and the task controller
pub mod conductor;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

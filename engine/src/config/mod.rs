//! Configuration management
//!
//! This module handles loading, validation, and management of the Cadence configuration.
//! Configuration is stored in TOML format at ~/.cadence/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Default backend, request timeout, per-backend endpoints and candidate models
//! - **memory**: Long-term store backend and retrieval snapshot bounds
//! - **executor**: Simulated latency jitter
//! - **history**: Task history retention and optimizer analysis window
//! - **optimizer**: Enable or disable the advisory optimizer step
//!
//! API keys are never stored in the file. Each cloud backend names the
//! environment variable its key is read from.
//!
//! # Examples
//!
//! ```no_run
//! use cadence_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Default backend: {}", config.llm.default_backend);
//! # Ok(())
//! # }
//! ```

use crate::llm::Backend;
use crate::secrets::{self, SecretString};
use sdk::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Backend settings
    #[serde(default)]
    pub llm: LLMConfig,

    /// Memory store settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Simulated execution settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Task history retention
    #[serde(default)]
    pub history: HistoryConfig,

    /// Optimizer settings
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMConfig {
    /// Backend used when a request does not name one
    #[serde(default = "default_backend")]
    pub default_backend: Backend,

    /// Per-request timeout in seconds; local backends get twice this
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_groq")]
    pub groq: ProviderConfig,

    #[serde(default = "default_openai")]
    pub openai: ProviderConfig,

    #[serde(default = "default_openrouter")]
    pub openrouter: ProviderConfig,

    #[serde(default = "default_ollama")]
    pub ollama: ProviderConfig,
}

/// Endpoint and candidate models of one backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Base URL of the provider API
    pub base_url: String,

    /// Candidate models in priority order; the first one is the default
    pub models: Vec<String>,

    /// Environment variable holding the API key (absent for local backends)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key from the environment
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key_env.as_deref().and_then(secrets::from_env)
    }
}

/// Long-term store selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// Single JSON document
    Json,
    /// SQLite table
    Sqlite,
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_backend")]
    pub backend: MemoryBackend,

    /// File name inside the data directory
    #[serde(default = "default_memory_file_name")]
    pub file_name: String,

    /// SQLite database file name inside the data directory
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Character budget of the long-term snapshot sent to retrieval
    #[serde(default = "default_snapshot_char_budget")]
    pub snapshot_char_budget: usize,

    /// Per-entry character limit inside the snapshot
    #[serde(default = "default_entry_char_limit")]
    pub entry_char_limit: usize,
}

/// Simulated execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    /// Lower bound of the simulated latency jitter
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the simulated latency jitter; 0 disables jitter
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Task history configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryConfig {
    /// Records kept before the oldest are evicted
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Most recent records sent to performance analysis
    #[serde(default = "default_analysis_window")]
    pub analysis_window: usize,
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.cadence")
}

fn default_backend() -> Backend {
    Backend::Groq
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_groq() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.groq.com/openai/v1".to_string(),
        models: [
            "llama-3.1-8b-instant",
            "llama-3.1-70b-versatile",
            "llama3-70b-8192",
            "llama3-8b-8192",
            "gemma2-9b-it",
            "gemma-7b-it",
            "mixtral-8x7b-32768",
            "llama-guard-3-8b",
        ]
        .iter()
        .map(|m| m.to_string())
        .collect(),
        api_key_env: Some("GROQ_API_KEY".to_string()),
    }
}

fn default_openai() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        models: vec!["gpt-4o-mini".to_string(), "o1-preview".to_string()],
        api_key_env: Some("OPENAI_API_KEY".to_string()),
    }
}

fn default_openrouter() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://openrouter.ai/api/v1".to_string(),
        models: vec!["meta-llama/llama-3.1-8b-instruct:free".to_string()],
        api_key_env: Some("OPENROUTER_API_KEY".to_string()),
    }
}

fn default_ollama() -> ProviderConfig {
    ProviderConfig {
        base_url: "http://localhost:11434".to_string(),
        models: vec!["llama3.1:8b".to_string()],
        api_key_env: None,
    }
}

fn default_memory_backend() -> MemoryBackend {
    MemoryBackend::Json
}

fn default_memory_file_name() -> String {
    "memory_storage.json".to_string()
}

fn default_database_name() -> String {
    "cadence.db".to_string()
}

fn default_snapshot_char_budget() -> usize {
    12_000
}

fn default_entry_char_limit() -> usize {
    2_000
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_max_records() -> usize {
    200
}

fn default_analysis_window() -> usize {
    20
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
            request_timeout_secs: default_request_timeout_secs(),
            groq: default_groq(),
            openai: default_openai(),
            openrouter: default_openrouter(),
            ollama: default_ollama(),
        }
    }
}

impl LLMConfig {
    /// Settings of one backend
    pub fn provider(&self, backend: Backend) -> &ProviderConfig {
        match backend {
            Backend::Groq => &self.groq,
            Backend::OpenAI => &self.openai,
            Backend::OpenRouter => &self.openrouter,
            Backend::Ollama => &self.ollama,
        }
    }

    /// Request timeout for a backend
    pub fn timeout_for(&self, backend: Backend) -> Duration {
        let secs = if backend == Backend::Ollama {
            self.request_timeout_secs.saturating_mul(2)
        } else {
            self.request_timeout_secs
        };
        Duration::from_secs(secs)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            file_name: default_memory_file_name(),
            database_name: default_database_name(),
            snapshot_char_budget: default_snapshot_char_budget(),
            entry_char_limit: default_entry_char_limit(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            analysis_window: default_analysis_window(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            memory: MemoryConfig::default(),
            executor: ExecutorConfig::default(),
            history: HistoryConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.cadence/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Validates the configuration after loading and returns descriptive errors
    /// if validation fails.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, PipelineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("Failed to read config file: {}", e))
        })?;

        let mut config = Self::from_toml(&contents)?;
        config.prepare_data_dir()?;

        Ok(config)
    }

    /// Parse and validate TOML without touching the filesystem
    pub fn from_toml(contents: &str) -> Result<Self, PipelineError> {
        let mut config: Config = toml::from_str(contents).map_err(|e| {
            PipelineError::Configuration(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        config.core.data_dir = expand_path(&config.core.data_dir)?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Configuration(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();

        // Written before ~ expansion so the file stays portable
        let toml_string = toml::to_string_pretty(&config).map_err(|e| {
            PipelineError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            PipelineError::Configuration(format!("Failed to write config file: {}", e))
        })?;

        let mut config = config;
        config.validate()?;
        config.core.data_dir = expand_path(&config.core.data_dir)?;
        config.prepare_data_dir()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.cadence/config.toml)
    fn default_config_path() -> Result<PathBuf, PipelineError> {
        let home = dirs::home_dir().ok_or_else(|| {
            PipelineError::Configuration("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".cadence").join("config.toml"))
    }

    /// Path of the JSON long-term store
    pub fn memory_file_path(&self) -> PathBuf {
        self.core.data_dir.join(&self.memory.file_name)
    }

    /// Path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join(&self.memory.database_name)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log level is unknown
    /// - A backend has no candidate models or a blank base URL
    /// - The executor delay bounds are inverted
    /// - History or snapshot bounds are zero
    pub fn validate(&self) -> Result<(), PipelineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(PipelineError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "llm.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        for backend in Backend::ALL {
            let provider = self.llm.provider(backend);
            if provider.base_url.trim().is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "llm.{}.base_url must not be empty",
                    backend
                )));
            }
            if provider.models.is_empty() || provider.models.iter().any(|m| m.trim().is_empty()) {
                return Err(PipelineError::Configuration(format!(
                    "llm.{}.models must list at least one non-empty model",
                    backend
                )));
            }
        }

        if self.executor.max_delay_ms != 0 && self.executor.min_delay_ms > self.executor.max_delay_ms
        {
            return Err(PipelineError::Configuration(format!(
                "executor.min_delay_ms ({}) must not exceed executor.max_delay_ms ({})",
                self.executor.min_delay_ms, self.executor.max_delay_ms
            )));
        }

        if self.history.max_records == 0 || self.history.analysis_window == 0 {
            return Err(PipelineError::Configuration(
                "history.max_records and history.analysis_window must be greater than 0"
                    .to_string(),
            ));
        }

        if self.memory.snapshot_char_budget == 0 || self.memory.entry_char_limit == 0 {
            return Err(PipelineError::Configuration(
                "memory.snapshot_char_budget and memory.entry_char_limit must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Create the data directory if it doesn't exist
    fn prepare_data_dir(&mut self) -> Result<(), PipelineError> {
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                PipelineError::Configuration(format!("Failed to create data directory: {}", e))
            })?;
        }
        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, PipelineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| PipelineError::Configuration("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            PipelineError::Configuration("Could not determine home directory".to_string())
        })?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir().ok_or_else(|| {
            PipelineError::Configuration("Could not determine home directory".to_string())
        })
    } else {
        Ok(path.to_path_buf())
    }
}

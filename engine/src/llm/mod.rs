//! Backend Abstraction Layer
//!
//! This module provides a common interface for interacting with interchangeable
//! text-generation backends (Groq, OpenAI, OpenRouter, Ollama). The `LLMProvider`
//! trait defines the contract that all providers must implement, enabling the
//! gateway to fail over between candidate models transparently.

use async_trait::async_trait;
use sdk::errors::PipelineError;
use sdk::types::{keys, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod gateway;
pub mod ollama;
pub mod openai;
pub mod structured;

pub use gateway::{BackendInfo, Gateway};

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during a single provider request
///
/// These never leave the gateway: it records them per candidate model and
/// reports exhaustion once every candidate has failed.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a role-tagged conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (system, user, assistant)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// A single completion request against one concrete model
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Model identifier understood by the provider
    pub model: &'a str,

    /// Conversation, system prompt first
    pub messages: &'a [Message],

    /// Ask the provider for a JSON object if it has a native mode for it
    pub json_mode: bool,
}

/// Provider trait that all backends must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "groq", "openai", "ollama")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama), false for cloud providers
    fn is_local(&self) -> bool;

    /// Whether the provider has a native structured-output mode
    fn supports_json_mode(&self) -> bool {
        true
    }

    /// Generate a completion for one model
    ///
    /// # Returns
    /// * `Ok(String)` - The raw completion text
    /// * `Err(LLMError)` - If the request fails
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String>;

    /// Check if the provider is currently usable
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Interchangeable text-generation backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Groq,
    OpenAI,
    OpenRouter,
    Ollama,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::Groq,
        Backend::OpenAI,
        Backend::OpenRouter,
        Backend::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Groq => "groq",
            Backend::OpenAI => "openai",
            Backend::OpenRouter => "openrouter",
            Backend::Ollama => "ollama",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(Backend::Groq),
            "openai" => Ok(Backend::OpenAI),
            "openrouter" => Ok(Backend::OpenRouter),
            "ollama" => Ok(Backend::Ollama),
            other => Err(PipelineError::Configuration(format!(
                "Invalid backend '{}'. Must be one of: groq, openai, openrouter, ollama",
                other
            ))),
        }
    }
}

/// Which backend (and optionally which model) a stage call should use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSelection {
    pub backend: Backend,
    pub model: Option<String>,
}

impl BackendSelection {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Read `api` and `model` from a run context
    ///
    /// A missing `api` falls back to `default`. A present but non-string value
    /// for either key is a configuration error.
    pub fn from_context(
        context: &Context,
        default: Backend,
    ) -> std::result::Result<Self, PipelineError> {
        let backend = match context.get(keys::API) {
            None => default,
            Some(value) => value
                .as_str()
                .ok_or_else(|| {
                    PipelineError::Configuration("context 'api' must be a string".to_string())
                })?
                .parse()?,
        };

        let model = match context.get(keys::MODEL) {
            None => None,
            Some(value) => Some(
                value
                    .as_str()
                    .ok_or_else(|| {
                        PipelineError::Configuration("context 'model' must be a string".to_string())
                    })?
                    .to_string(),
            ),
        };

        Ok(Self { backend, model })
    }
}

impl fmt::Display for BackendSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}:{}", self.backend, model),
            None => write!(f, "{}", self.backend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let system_msg = Message::system("You are a planner");
        assert_eq!(system_msg.role, MessageRole::System);
        assert_eq!(system_msg.role.to_string(), "system");
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("groq".parse::<Backend>().unwrap(), Backend::Groq);
        assert_eq!("OpenRouter".parse::<Backend>().unwrap(), Backend::OpenRouter);
        let err = "bedrock".parse::<Backend>().unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_backend_serde_names() {
        let json = serde_json::to_string(&Backend::OpenAI).unwrap();
        assert_eq!(json, r#""openai""#);
    }

    #[test]
    fn test_selection_from_empty_context_uses_default() {
        let selection = BackendSelection::from_context(&Context::new(), Backend::Groq).unwrap();
        assert_eq!(selection, BackendSelection::new(Backend::Groq));
    }

    #[test]
    fn test_selection_reads_api_and_model() {
        let mut context = Context::new();
        context.insert("api", json!("openrouter"));
        context.insert("model", json!("meta-llama/llama-3.1-8b-instruct:free"));
        let selection = BackendSelection::from_context(&context, Backend::Groq).unwrap();
        assert_eq!(selection.backend, Backend::OpenRouter);
        assert_eq!(
            selection.model.as_deref(),
            Some("meta-llama/llama-3.1-8b-instruct:free")
        );
    }

    #[test]
    fn test_selection_rejects_non_string_api() {
        let mut context = Context::new();
        context.insert("api", json!(3));
        assert!(BackendSelection::from_context(&context, Backend::Groq).is_err());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for stage tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Answers with queued responses in order and records every conversation
    pub(crate) struct QueueProvider {
        responses: Mutex<VecDeque<String>>,
        pub(crate) conversations: Mutex<Vec<Vec<Message>>>,
    }

    impl QueueProvider {
        pub(crate) fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
                conversations: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.conversations.lock().unwrap().len()
        }

        /// User prompt of the n-th call
        pub(crate) fn prompt(&self, index: usize) -> String {
            self.conversations.lock().unwrap()[index]
                .iter()
                .find(|m| m.role == MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LLMProvider for QueueProvider {
        fn name(&self) -> &str {
            "queue"
        }

        fn is_local(&self) -> bool {
            true
        }

        async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
            self.conversations
                .lock()
                .unwrap()
                .push(request.messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LLMError::InvalidRequest("script exhausted".to_string()))
        }
    }

    /// Gateway whose only backend (groq, single model) is a queue provider
    pub(crate) fn scripted_gateway(responses: &[&str]) -> (Arc<Gateway>, Arc<QueueProvider>) {
        let provider = Arc::new(QueueProvider::new(responses));
        let gateway = Gateway::new().with_backend(
            Backend::Groq,
            Arc::clone(&provider) as Arc<dyn LLMProvider>,
            vec!["scripted-model".to_string()],
            Duration::from_secs(5),
        );
        (Arc::new(gateway), provider)
    }

    pub(crate) fn groq() -> BackendSelection {
        BackendSelection::new(Backend::Groq)
    }
}

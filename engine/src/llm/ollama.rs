//! Ollama backend
//!
//! Talks to a local Ollama daemon (default http://localhost:11434) over
//! `POST /api/chat` with streaming off. No API key is involved. Structured
//! output uses Ollama's `format: "json"` switch.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{CompletionRequest, LLMError, LLMProvider, MessageRole, Result};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    client: Client,
}

impl OllamaProvider {
    /// Request timeouts are enforced by the gateway, not by the HTTP client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn chat_body<'a>(request: &'a CompletionRequest<'a>) -> ChatBody<'a> {
        ChatBody {
            model: request.model,
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
            stream: false,
            format: request.json_mode.then_some("json"),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> LLMError {
        if err.is_timeout() {
            LLMError::Timeout
        } else if err.is_connect() {
            LLMError::ProviderUnavailable(format!("no Ollama daemon at {}", self.base_url))
        } else {
            LLMError::NetworkError(err.to_string())
        }
    }
}

/// Map a non-success status from the daemon
fn status_error(status: StatusCode, model: &str, body: &str) -> LLMError {
    match status {
        StatusCode::NOT_FOUND => {
            LLMError::InvalidRequest(format!("model '{}' is not pulled: {}", model, body))
        }
        StatusCode::BAD_REQUEST => LLMError::InvalidRequest(body.to_string()),
        _ => LLMError::ProviderUnavailable(format!("HTTP {}: {}", status, body)),
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/version", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let body = Self::chat_body(request);
        tracing::debug!(
            model = request.model,
            messages = body.messages.len(),
            json = request.json_mode,
            "ollama chat request"
        );

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, request.model, &text));
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("unreadable Ollama reply: {}", e)))?;
        tracing::debug!(
            model = request.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ollama chat reply"
        );

        if !reply.done {
            return Err(LLMError::ParseError("reply was truncated".to_string()));
        }
        if reply.message.content.trim().is_empty() {
            return Err(LLMError::ParseError("Empty content".to_string()));
        }
        Ok(reply.message.content)
    }
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: MessageRole,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: ReplyMessage,
    #[serde(default = "default_done")]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

fn default_done() -> bool {
    true
}

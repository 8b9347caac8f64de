//! OpenAI-compatible chat completions provider
//!
//! Groq, OpenAI and OpenRouter all expose `POST {base_url}/chat/completions`
//! with bearer authentication, so one provider type serves all three.

use super::{CompletionRequest, LLMError, LLMProvider};
use crate::secrets::{self, SecretString};
use async_trait::async_trait;
use serde_json::json;

pub struct OpenAICompatibleProvider {
    name: String,
    base_url: String,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl OpenAICompatibleProvider {
    /// Create a provider; a missing key is reported per request, not here
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> super::Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            LLMError::AuthenticationFailed(format!("no API key configured for {}", self.name))
        })?;

        let url = format!("{}/chat/completions", self.base_url);

        let api_messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let mut payload = json!({
            "model": request.model,
            "messages": api_messages,
        });
        if request.json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key.unsecure()))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = secrets::scrub(&response.text().await.unwrap_or_default(), api_key);

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LLMError::AuthenticationFailed(text));
            } else if status.as_u16() == 429 {
                return Err(LLMError::RateLimitExceeded);
            } else if status.is_server_error() {
                return Err(LLMError::ProviderUnavailable(format!("HTTP {}: {}", status, text)));
            } else {
                return Err(LLMError::InvalidRequest(format!("HTTP {}: {}", status, text)));
            }
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        let message = choice
            .get("message")
            .ok_or_else(|| LLMError::ParseError("No message in choice".to_string()))?;

        match message.get("content").and_then(|c| c.as_str()) {
            Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
            _ => Err(LLMError::ParseError("Empty content".to_string())),
        }
    }
}

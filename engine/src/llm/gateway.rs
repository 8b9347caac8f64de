//! Backend Gateway
//!
//! Routes a stage's conversation to the selected backend and fails over across
//! that backend's candidate models. Every attempt is bounded by a timeout; a
//! timeout is just another candidate failure. Only when every candidate has
//! failed does the caller see an error, as `PipelineError::BackendExhausted`
//! carrying one record per attempt.
//!
//! The gateway holds no per-run state and is shared between concurrent runs
//! behind an `Arc`.

use super::ollama::OllamaProvider;
use super::openai::OpenAICompatibleProvider;
use super::{Backend, BackendSelection, CompletionRequest, LLMError, LLMProvider, Message};
use crate::config::LLMConfig;
use sdk::errors::{BackendAttempt, PipelineError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One registered backend
struct BackendRoute {
    provider: Arc<dyn LLMProvider>,
    models: Vec<String>,
    timeout: Duration,
    /// False when a required credential is missing
    configured: bool,
}

impl BackendRoute {
    /// Candidate models for one call: the override first, then the rest in order
    fn candidates(&self, backend: Backend, model: Option<&str>) -> Result<Vec<&str>, PipelineError> {
        let Some(preferred) = model else {
            return Ok(self.models.iter().map(String::as_str).collect());
        };

        // Borrow the override from the route so the result lives as long as `self`
        let Some(preferred) = self
            .models
            .iter()
            .map(String::as_str)
            .find(|m| *m == preferred)
        else {
            return Err(PipelineError::Configuration(format!(
                "model '{}' is not a candidate of backend '{}' (candidates: {})",
                preferred,
                backend,
                self.models.join(", ")
            )));
        };

        let mut ordered = vec![preferred];
        ordered.extend(
            self.models
                .iter()
                .map(String::as_str)
                .filter(|m| *m != preferred),
        );
        Ok(ordered)
    }
}

/// Description of a registered backend, for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendInfo {
    pub backend: Backend,
    pub models: Vec<String>,
    pub local: bool,
    pub configured: bool,
    pub timeout_secs: u64,
}

/// Multi-backend text generation with candidate failover
#[derive(Default)]
pub struct Gateway {
    routes: BTreeMap<Backend, BackendRoute>,
}

impl Gateway {
    /// Create an empty gateway; register backends with [`Gateway::with_backend`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the gateway for every backend in the configuration
    ///
    /// Cloud backends whose API key variable is unset are still listed but
    /// refuse requests with a configuration error.
    pub fn from_config(config: &LLMConfig) -> Self {
        let mut gateway = Self::new();

        for backend in Backend::ALL {
            let settings = config.provider(backend);
            let timeout = config.timeout_for(backend);

            let (provider, configured): (Arc<dyn LLMProvider>, bool) = match backend {
                Backend::Ollama => (Arc::new(OllamaProvider::new(&settings.base_url)), true),
                _ => {
                    let key = settings.api_key();
                    let configured = key.is_some();
                    (
                        Arc::new(OpenAICompatibleProvider::new(
                            backend.as_str(),
                            &settings.base_url,
                            key,
                        )),
                        configured,
                    )
                }
            };

            gateway.routes.insert(
                backend,
                BackendRoute {
                    provider,
                    models: settings.models.clone(),
                    timeout,
                    configured,
                },
            );
        }

        gateway
    }

    /// Register a provider for a backend, replacing any previous registration
    pub fn with_backend(
        mut self,
        backend: Backend,
        provider: Arc<dyn LLMProvider>,
        models: Vec<String>,
        timeout: Duration,
    ) -> Self {
        self.routes.insert(
            backend,
            BackendRoute {
                provider,
                models,
                timeout,
                configured: true,
            },
        );
        self
    }

    /// List registered backends
    pub fn backends(&self) -> Vec<BackendInfo> {
        self.routes
            .iter()
            .map(|(backend, route)| BackendInfo {
                backend: *backend,
                models: route.models.clone(),
                local: route.provider.is_local(),
                configured: route.configured,
                timeout_secs: route.timeout.as_secs(),
            })
            .collect()
    }

    fn route(&self, backend: Backend) -> Result<&BackendRoute, PipelineError> {
        let route = self.routes.get(&backend).ok_or_else(|| {
            PipelineError::Configuration(format!("backend '{}' is not registered", backend))
        })?;

        if !route.configured {
            return Err(PipelineError::Configuration(format!(
                "backend '{}' has no API key configured",
                backend
            )));
        }

        if route.models.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "backend '{}' has no candidate models",
                backend
            )));
        }

        Ok(route)
    }

    /// Candidate models that a call with `selection` would try, in order
    pub fn candidates(&self, selection: &BackendSelection) -> Result<Vec<String>, PipelineError> {
        let route = self.route(selection.backend)?;
        Ok(route
            .candidates(selection.backend, selection.model.as_deref())?
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Generate a completion, failing over across candidate models
    ///
    /// # Errors
    /// * `Configuration` - unknown backend, missing key, or a model override
    ///   outside the candidate list; nothing is sent
    /// * `BackendExhausted` - every candidate failed or timed out
    pub async fn generate(
        &self,
        messages: &[Message],
        selection: &BackendSelection,
        json_mode: bool,
    ) -> Result<String, PipelineError> {
        let route = self.route(selection.backend)?;
        let candidates = route.candidates(selection.backend, selection.model.as_deref())?;
        let json_mode = json_mode && route.provider.supports_json_mode();

        let mut attempts = Vec::with_capacity(candidates.len());

        for model in candidates {
            tracing::debug!(
                "Attempting {}:{} (timeout: {}s, json_mode: {})",
                selection.backend,
                model,
                route.timeout.as_secs(),
                json_mode
            );

            let request = CompletionRequest {
                model,
                messages,
                json_mode,
            };

            let result = tokio::time::timeout(route.timeout, route.provider.complete(&request)).await;

            match result {
                Ok(Ok(text)) => {
                    tracing::debug!(
                        "{}:{} answered ({} chars)",
                        selection.backend,
                        model,
                        text.len()
                    );
                    return Ok(text);
                }
                Ok(Err(e)) => {
                    tracing::warn!("{}:{} failed: {}", selection.backend, model, e);
                    attempts.push(BackendAttempt::new(model, e.to_string()));
                }
                Err(_) => {
                    tracing::warn!(
                        "{}:{} timed out after {}s",
                        selection.backend,
                        model,
                        route.timeout.as_secs()
                    );
                    attempts.push(BackendAttempt::new(model, LLMError::Timeout.to_string()));
                }
            }
        }

        tracing::error!(
            "All {} candidate models of {} exhausted",
            attempts.len(),
            selection.backend
        );
        Err(PipelineError::BackendExhausted {
            backend: selection.backend.to_string(),
            attempts,
        })
    }

    /// Send the same conversation to every configured backend concurrently
    ///
    /// Each backend fails over across its own candidates; one backend failing
    /// does not affect the others. Results are in backend order.
    pub async fn compare(
        &self,
        messages: &[Message],
        json_mode: bool,
    ) -> Vec<(Backend, Result<String, PipelineError>)> {
        let calls = self
            .routes
            .iter()
            .filter(|(_, route)| route.configured)
            .map(|(backend, _)| async move {
                let selection = BackendSelection::new(*backend);
                (*backend, self.generate(messages, &selection, json_mode).await)
            });
        futures::future::join_all(calls).await
    }

    /// Check the health of all registered backends
    pub async fn check_health(&self) -> Vec<(Backend, bool)> {
        let mut results = Vec::with_capacity(self.routes.len());
        for (backend, route) in &self.routes {
            let healthy = route.configured && route.provider.check_health().await;
            results.push((*backend, healthy));
        }
        results
    }
}

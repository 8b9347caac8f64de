//! Integration tests for the task pipeline
//!
//! A stage-aware scripted backend answers each request according to the role in
//! its system prompt, so runs can be driven end to end, concurrently, and over
//! the real HTTP wire through wiremock.

use async_trait::async_trait;
use cadence_engine::conductor::{SimulatedLatency, TaskHistory, TaskPipeline};
use cadence_engine::config::Config;
use cadence_engine::llm::{Backend, CompletionRequest, Gateway, LLMError, LLMProvider, MessageRole};
use cadence_engine::memory::{JsonFileStore, LongTermStore, Memory, SnapshotLimits};
use futures::future::join_all;
use sdk::errors::{ErrorClass, PipelineError};
use sdk::types::{keys, TaskRequest};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Canned answer for a stage, chosen by the stage's system prompt
fn answer_for(system: &str) -> Option<String> {
    let answer = if system.contains("AI planner") {
        json!({"plan": [
            {"action": "Pick a park", "description": "Choose a nearby park"},
            {"action": "Pack food", "description": "Sandwiches and fruit"},
            {"action": "Invite friends", "description": "Send invitations"}
        ]})
    } else if system.contains("AI executor") {
        json!({"result": "done", "side_effects": "none", "resources_used": ["time"], "time_taken": 10})
    } else if system.contains("assess the outcomes of actions") {
        json!({"score": 80, "achievements": ["on time"], "improvements": [], "surprises": [], "recommendations": []})
    } else if system.contains("overall assessment") {
        json!({"summary": "Went well", "improvements": [], "lessons": ["start early"], "recommendations": ["check weather"]})
    } else if system.contains("memory manager") {
        json!({"outdoor_planning": "Check the forecast first", "logistics": ["pack the night before"]})
    } else if system.contains("memory retrieval") {
        json!({"relevant_info": ["Parks fill up by noon"], "synthesis": "Go early"})
    } else if system.contains("performance analyst") {
        json!({"success_patterns": ["short plans"], "issues": [], "trends": "stable", "improvement_areas": ["timing"]})
    } else if system.contains("optimization expert") {
        json!({
            "planning_suggestions": [["Add a weather step", "Fewer surprises"]],
            "reasoning_suggestions": [],
            "execution_suggestions": [],
            "evaluation_suggestions": []
        })
    } else if system.contains("system architect") {
        json!({"Add a weather step": {"implementation": "Insert a forecast check", "impact": "fewer failures", "risks": "longer plans"}})
    } else {
        return None;
    };
    Some(answer.to_string())
}

/// In-process backend that answers every stage and can refuse executor calls
struct StageProvider {
    calls: AtomicUsize,
    fail_execution: bool,
    retrieval_prompts: Mutex<Vec<String>>,
}

impl StageProvider {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_execution: false,
            retrieval_prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing_execution() -> Self {
        Self {
            fail_execution: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl LLMProvider for StageProvider {
    fn name(&self) -> &str {
        "stage"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = request
            .messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if system.contains("memory retrieval") {
            if let Some(user) = request.messages.iter().find(|m| m.role == MessageRole::User) {
                self.retrieval_prompts.lock().unwrap().push(user.content.clone());
            }
        }
        if self.fail_execution && system.contains("AI executor") {
            return Err(LLMError::ProviderUnavailable("executor offline".to_string()));
        }
        answer_for(system).ok_or_else(|| LLMError::InvalidRequest("unknown stage".to_string()))
    }
}

async fn pipeline_with(provider: Arc<StageProvider>, dir: &TempDir) -> TaskPipeline {
    let gateway = Arc::new(Gateway::new().with_backend(
        Backend::Groq,
        provider,
        vec!["m1".to_string(), "m2".to_string()],
        Duration::from_secs(5),
    ));
    let store = Arc::new(JsonFileStore::new(dir.path().join("memory_storage.json")));
    let memory = Memory::load(Arc::clone(&gateway), store, SnapshotLimits::default())
        .await
        .unwrap();

    TaskPipeline::new(gateway, Arc::new(memory), Arc::new(TaskHistory::new(50)))
        .with_latency(SimulatedLatency::disabled())
}

#[tokio::test]
async fn test_plan_a_picnic_persists_memory() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_with(Arc::new(StageProvider::new()), &dir).await;

    let outcome = pipeline
        .run_task(TaskRequest::new("plan a picnic"))
        .await
        .unwrap();

    assert_eq!(outcome.plan.len(), 3);
    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.evaluation.score, 80.0);

    let history = pipeline.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].context.total_time(), 30.0);
    assert_eq!(history[0].context.get(keys::SYNTHESIS), Some(&json!("Go early")));

    // A fresh store over the same file sees what the run stored
    let reopened = JsonFileStore::new(dir.path().join("memory_storage.json"));
    let entries = reopened.load().await.unwrap();
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["logistics", "outdoor_planning"]);
}

#[tokio::test]
async fn test_outcome_serializes_with_response_shape() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_with(Arc::new(StageProvider::new()), &dir).await;

    let outcome = pipeline
        .run_task(TaskRequest::new("plan a picnic"))
        .await
        .unwrap();
    let value = serde_json::to_value(&outcome).unwrap();

    assert_eq!(value["task"], json!("plan a picnic"));
    assert!(value["plan"].is_array());
    assert!(value["results"].is_array());
    assert_eq!(value["evaluation"]["score"], json!(80.0));
}

#[tokio::test]
async fn test_concurrent_runs_share_history() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(StageProvider::new());
    let pipeline = Arc::new(pipeline_with(Arc::clone(&provider), &dir).await);

    let runs = ["plan a picnic", "plan a hike", "plan a dinner"].map(|task| {
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.run_task(TaskRequest::new(task)).await }
    });
    let results = join_all(runs).await;

    assert!(results.iter().all(Result::is_ok));
    let history = pipeline.history().await;
    assert_eq!(history.len(), 3);
    let mut tasks: Vec<&str> = history.iter().map(|r| r.task.as_str()).collect();
    tasks.sort();
    assert_eq!(tasks, vec!["plan a dinner", "plan a hike", "plan a picnic"]);
}

/// Text after `label` up to the end of its line
fn prompt_field<'a>(prompt: &'a str, label: &str) -> &'a str {
    prompt
        .split(label)
        .nth(1)
        .and_then(|rest| rest.lines().next())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_concurrent_runs_keep_short_term_memory_apart() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(StageProvider::new());
    let pipeline = Arc::new(pipeline_with(Arc::clone(&provider), &dir).await);

    let tasks = ["plan a picnic", "plan a hike", "plan a dinner", "plan a party"];
    let runs = tasks.map(|task| {
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.run_task(TaskRequest::new(task)).await }
    });
    assert!(join_all(runs).await.iter().all(Result::is_ok));

    let prompts = provider.retrieval_prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), tasks.len());
    for prompt in &prompts {
        let query = prompt_field(prompt, "Query: ");
        let short_term: Value =
            serde_json::from_str(prompt_field(prompt, "Short-term memory: ")).unwrap();
        // Each retrieval sees only its own run's scratch
        assert_eq!(short_term["current_task"], json!(query));
        assert_eq!(short_term.as_object().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_second_run_runs_optimizer() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(StageProvider::new());
    let pipeline = pipeline_with(Arc::clone(&provider), &dir).await;

    pipeline.run_task(TaskRequest::new("plan a picnic")).await.unwrap();
    let first_run_calls = provider.calls.load(Ordering::SeqCst);
    pipeline.run_task(TaskRequest::new("plan a hike")).await.unwrap();
    let second_run_calls = provider.calls.load(Ordering::SeqCst) - first_run_calls;

    // analysis + suggestions + one change plan for the planning component
    assert_eq!(second_run_calls, first_run_calls + 3);
}

#[tokio::test]
async fn test_executor_outage_halts_run() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_with(Arc::new(StageProvider::failing_execution()), &dir).await;

    let err = pipeline
        .run_task(TaskRequest::new("plan a picnic"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ExecutionHalted { step: 0, .. }));
    assert!(err.partial_results().is_empty());
    assert_eq!(err.class(), ErrorClass::BackendExhausted);
    assert!(pipeline.history().await.is_empty());

    let store = JsonFileStore::new(dir.path().join("memory_storage.json"));
    assert!(store.load().await.unwrap().is_empty());
}

/// Answers OpenAI-compatible chat requests by stage
struct StageResponder;

impl Respond for StageResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let system = body["messages"][0]["content"].as_str().unwrap_or_default();

        match answer_for(system) {
            Some(content) => ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })),
            None => ResponseTemplate::new(400),
        }
    }
}

#[tokio::test]
async fn test_pipeline_from_config_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(StageResponder)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::env::set_var("CADENCE_IT_PIPELINE_KEY", "pipeline-key");
    let config = Config::from_toml(&format!(
        r#"
        [core]
        data_dir = "{}"

        [llm]
        default_backend = "groq"

        [llm.groq]
        base_url = "{}"
        models = ["llama-3.1-8b-instant"]
        api_key_env = "CADENCE_IT_PIPELINE_KEY"

        [memory]
        backend = "sqlite"

        [executor]
        min_delay_ms = 0
        max_delay_ms = 0
        "#,
        dir.path().display(),
        server.uri()
    ))
    .unwrap();

    let pipeline = TaskPipeline::from_config(&config).await.unwrap();
    let outcome = pipeline
        .run_task(TaskRequest::new("plan a picnic"))
        .await
        .unwrap();

    assert_eq!(outcome.plan.len(), 3);
    assert_eq!(pipeline.history().await.len(), 1);
    assert_eq!(
        pipeline.memory().get_long_term("outdoor_planning").await,
        Some(json!("Check the forecast first"))
    );
}

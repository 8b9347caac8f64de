//! Cross-task memory
//!
//! Two stores, both owned exclusively by [`Memory`]:
//!
//! - **Long-term**: category → summarized insight, loaded once at construction
//!   and written through to a [`LongTermStore`] after every write.
//! - **Short-term**: a [`ShortTermMemory`] scratch owned by one run, never
//!   persisted, never shared with concurrent runs, and cleared when the run ends.
//!
//! Writes come from `summarize_and_store`, which asks a backend to distill a
//! finished episode into categories. Reads come from `retrieve_relevant_info`,
//! which sends a bounded snapshot of long-term memory alongside the query.

pub mod store;

pub use store::{InMemoryStore, JsonFileStore, LongTermStore};

use crate::config::{Config, MemoryBackend, MemoryConfig};
use crate::db::{Database, SqliteStore};
use crate::llm::structured::{from_value, request_value};
use crate::llm::{BackendSelection, Gateway};
use sdk::errors::PipelineError;
use sdk::types::{Context, Episode, RelevantInfo};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

const SUMMARIZE_SYSTEM: &str = "You are an AI memory manager. Your job is to extract and \
summarize key information for long-term storage.";

const RETRIEVE_SYSTEM: &str = "You are an AI memory retrieval system. Your job is to find and \
synthesize relevant information from stored memories.";

/// One long-term category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    /// Unix milliseconds of the last write, 0 when unknown
    pub updated_at: i64,
}

/// Bounds on the long-term snapshot forwarded to retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotLimits {
    /// Total characters across keys and rendered values
    pub char_budget: usize,
    /// Characters per rendered value before truncation
    pub entry_char_limit: usize,
}

impl From<&MemoryConfig> for SnapshotLimits {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            char_budget: config.snapshot_char_budget,
            entry_char_limit: config.entry_char_limit,
        }
    }
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

/// Scratch for a single run
///
/// Owned by the run that created it, so concurrent runs never see or clear
/// each other's entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShortTermMemory {
    entries: Map<String, Value>,
}

impl ShortTermMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_value(&self) -> Value {
        Value::Object(self.entries.clone())
    }
}

/// Open the long-term store selected in the configuration
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn LongTermStore>> {
    let store: Arc<dyn LongTermStore> = match config.memory.backend {
        MemoryBackend::Json => Arc::new(JsonFileStore::new(config.memory_file_path())),
        MemoryBackend::Sqlite => {
            let db = Database::new(&config.database_path()).await?;
            Arc::new(SqliteStore::new(db.pool().clone()))
        }
    };
    Ok(store)
}

pub struct Memory {
    gateway: Arc<Gateway>,
    store: Arc<dyn LongTermStore>,
    limits: SnapshotLimits,
    /// Oldest write first
    long_term: Mutex<Vec<MemoryEntry>>,
}

impl Memory {
    /// Build the memory and load the persisted long-term mapping
    pub async fn load(
        gateway: Arc<Gateway>,
        store: Arc<dyn LongTermStore>,
        limits: SnapshotLimits,
    ) -> Result<Self, PipelineError> {
        let entries = store.load().await?;
        tracing::info!(
            "Loaded {} long-term memory entries from {} store",
            entries.len(),
            store.name()
        );

        Ok(Self {
            gateway,
            store,
            limits,
            long_term: Mutex::new(entries),
        })
    }

    /// Persist the full long-term mapping
    pub async fn save(&self) -> Result<(), PipelineError> {
        let entries = self.long_term.lock().await;
        self.store.save(&entries).await
    }

    /// Insert or replace a category and write it through
    pub async fn put_long_term(
        &self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), PipelineError> {
        self.put_long_term_all(vec![(key.into(), value)]).await
    }

    /// Insert or replace several categories with a single write
    ///
    /// The in-memory mapping only changes once the store accepted the new
    /// mapping, so a failed write leaves both sides as they were.
    async fn put_long_term_all(&self, updates: Vec<(String, Value)>) -> Result<(), PipelineError> {
        let mut entries = self.long_term.lock().await;
        let now = chrono::Utc::now().timestamp_millis();

        let mut next = entries.clone();
        for (key, value) in updates {
            next.retain(|e| e.key != key);
            next.push(MemoryEntry {
                key,
                value,
                updated_at: now,
            });
        }

        self.store.save(&next).await?;
        *entries = next;
        Ok(())
    }

    pub async fn get_long_term(&self, key: &str) -> Option<Value> {
        self.long_term
            .lock()
            .await
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.clone())
    }

    /// All long-term entries, oldest write first
    pub async fn long_term_entries(&self) -> Vec<MemoryEntry> {
        self.long_term.lock().await.clone()
    }

    /// Long-term entries within the snapshot budget, most recent first
    ///
    /// Values longer than the per-entry limit are rendered and cut to a string.
    /// Entries that no longer fit the remaining budget are left out.
    pub async fn snapshot(&self) -> Vec<(String, Value)> {
        let entries = self.long_term.lock().await;
        let mut remaining = self.limits.char_budget;
        let mut snapshot = Vec::new();

        for entry in entries.iter().rev() {
            let rendered = entry.value.to_string();
            let (value, cost) = if rendered.chars().count() > self.limits.entry_char_limit {
                let cut: String = rendered.chars().take(self.limits.entry_char_limit).collect();
                let cost = self.limits.entry_char_limit;
                (Value::String(format!("{}...", cut)), cost)
            } else {
                let cost = rendered.chars().count();
                (entry.value.clone(), cost)
            };

            let cost = cost + entry.key.chars().count();
            if cost > remaining {
                continue;
            }
            remaining -= cost;
            snapshot.push((entry.key.clone(), value));
        }

        snapshot
    }

    /// Distill a finished episode into long-term categories
    ///
    /// Returns the number of categories written. A response that is not a JSON
    /// object is a schema violation and writes nothing.
    pub async fn summarize_and_store(
        &self,
        episode: &Episode<'_>,
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<usize, PipelineError> {
        let episode_json = serde_json::to_string(episode)
            .map_err(|e| PipelineError::InvariantViolation(format!("episode not encodable: {}", e)))?;

        let prompt = format!(
            "Data: {}\nContext: {}\n\n\
            Summarize the key information from this data that should be remembered for future tasks.\n\
            Consider:\n\
            1. Important insights or lessons learned\n\
            2. Successful strategies or approaches\n\
            3. Common pitfalls or errors to avoid\n\
            4. Relevant statistics or metrics\n\n\
            Respond with a single JSON object whose keys are categories of information \
            and whose values contain the summarized insights.",
            episode_json, context
        );

        let summary: Value =
            request_value(&self.gateway, "memory", SUMMARIZE_SYSTEM, prompt, selection).await?;

        let Value::Object(categories) = summary else {
            return Err(PipelineError::schema(
                "memory",
                "summary must be a JSON object of categories",
            ));
        };

        let written = categories.len();
        if written > 0 {
            self.put_long_term_all(categories.into_iter().collect()).await?;
        }

        tracing::info!("Stored {} memory categories", written);
        Ok(written)
    }

    /// Find stored information relevant to `query`
    ///
    /// Only the caller's own `short_term` scratch is forwarded.
    pub async fn retrieve_relevant_info(
        &self,
        query: &str,
        context: &Context,
        short_term: &ShortTermMemory,
        selection: &BackendSelection,
    ) -> Result<RelevantInfo, PipelineError> {
        let long_term: Map<String, Value> = self.snapshot().await.into_iter().collect();
        let short_term = short_term.to_value();

        let prompt = format!(
            "Query: {}\nContext: {}\nLong-term memory: {}\nShort-term memory: {}\n\n\
            Retrieve and synthesize relevant information from the provided memories that could be \
            useful for addressing the query. Consider both long-term and short-term memories.\n\n\
            Respond with a JSON object with keys 'relevant_info' (a list of relevant pieces of \
            information as strings) and 'synthesis' (a brief summary of how this information \
            relates to the query).",
            query,
            context,
            Value::Object(long_term),
            short_term
        );

        let raw: Value =
            request_value(&self.gateway, "memory", RETRIEVE_SYSTEM, prompt, selection).await?;
        from_value("memory", raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{groq, scripted_gateway};
    use async_trait::async_trait;
    use sdk::types::{Plan, PlanEvaluation, PlanStep};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // Counts saves and refuses them while `broken` is set
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        broken: AtomicBool,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl LongTermStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn load(&self) -> Result<Vec<MemoryEntry>, PipelineError> {
            self.inner.load().await
        }

        async fn save(&self, entries: &[MemoryEntry]) -> Result<(), PipelineError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                return Err(PipelineError::Persistence("disk full".to_string()));
            }
            self.inner.save(entries).await
        }
    }

    async fn memory_with(responses: &[&str], store: Arc<dyn LongTermStore>) -> Memory {
        let (gateway, _) = scripted_gateway(responses);
        Memory::load(gateway, store, SnapshotLimits::default())
            .await
            .unwrap()
    }

    fn evaluation() -> PlanEvaluation {
        PlanEvaluation {
            summary: json!("fine"),
            improvements: json!([]),
            lessons: json!([]),
            recommendations: json!([]),
            score: 80.0,
            action_evaluations: vec![],
        }
    }

    #[tokio::test]
    async fn test_put_long_term_writes_through() {
        let store = Arc::new(InMemoryStore::new());
        let memory = memory_with(&[], Arc::clone(&store) as Arc<dyn LongTermStore>).await;

        memory.put_long_term("k", json!("v")).await.unwrap();

        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].key, "k");
        assert_eq!(memory.get_long_term("k").await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_rewrite_moves_key_to_most_recent() {
        let memory = memory_with(&[], Arc::new(InMemoryStore::new())).await;
        memory.put_long_term("a", json!(1)).await.unwrap();
        memory.put_long_term("b", json!(2)).await.unwrap();
        memory.put_long_term("a", json!(3)).await.unwrap();

        let keys: Vec<_> = memory
            .long_term_entries()
            .await
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_short_term_clear() {
        let mut scratch = ShortTermMemory::new();
        scratch.put("k", json!("v"));
        assert_eq!(scratch.get("k"), Some(&json!("v")));

        scratch.clear();
        assert_eq!(scratch.get("k"), None);
        assert!(scratch.is_empty());
    }

    #[tokio::test]
    async fn test_save_restores_a_wiped_store() {
        let store = Arc::new(InMemoryStore::new());
        let memory = memory_with(&[], Arc::clone(&store) as Arc<dyn LongTermStore>).await;
        memory.put_long_term("weather", json!("check the forecast")).await.unwrap();
        memory.put_long_term("food", json!(["fruit"])).await.unwrap();

        store.save(&[]).await.unwrap();
        memory.save().await.unwrap();

        let (gateway, _) = scripted_gateway(&[]);
        let reloaded = Memory::load(gateway, store, SnapshotLimits::default())
            .await
            .unwrap();
        let keys: Vec<_> = reloaded
            .long_term_entries()
            .await
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["weather", "food"]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let store = Arc::new(FlakyStore::default());
        let memory = memory_with(&[], Arc::clone(&store) as Arc<dyn LongTermStore>).await;
        memory.put_long_term("kept", json!(1)).await.unwrap();

        store.broken.store(true, Ordering::SeqCst);
        let err = memory.put_long_term("lost", json!(2)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Persistence(_)));
        assert_eq!(memory.get_long_term("lost").await, None);
        assert_eq!(memory.long_term_entries().await.len(), 1);
        assert_eq!(store.inner.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_prefers_recent_and_truncates() {
        let store = InMemoryStore::with_entries(vec![
            MemoryEntry { key: "old".into(), value: json!("x".repeat(40)), updated_at: 1 },
            MemoryEntry { key: "long".into(), value: json!("y".repeat(500)), updated_at: 2 },
            MemoryEntry { key: "new".into(), value: json!("z"), updated_at: 3 },
        ]);
        let (gateway, _) = scripted_gateway(&[]);
        let memory = Memory::load(
            gateway,
            Arc::new(store),
            SnapshotLimits { char_budget: 120, entry_char_limit: 100 },
        )
        .await
        .unwrap();

        let snapshot = memory.snapshot().await;
        let keys: Vec<_> = snapshot.iter().map(|(k, _)| k.as_str()).collect();
        // "new" costs 6, "long" 104, "old" 45 which no longer fits
        assert_eq!(keys, vec!["new", "long"]);
        let long = snapshot[1].1.as_str().unwrap();
        assert!(long.ends_with("..."));
        assert_eq!(long.chars().count(), 103);
    }

    #[tokio::test]
    async fn test_summarize_and_store_writes_each_category() {
        let store = Arc::new(InMemoryStore::new());
        let memory = memory_with(
            &[r#"{"lessons": ["check the weather"], "strategies": "start early"}"#],
            Arc::clone(&store) as Arc<dyn LongTermStore>,
        )
        .await;

        let plan = Plan::new(vec![PlanStep::new("Pack", "Pack food")]);
        let eval = evaluation();
        let episode = Episode { task: "picnic", plan: &plan, results: &[], evaluation: &eval };

        let written = memory
            .summarize_and_store(&episode, &Context::new(), &groq())
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(memory.get_long_term("strategies").await, Some(json!("start early")));
        assert_eq!(store.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_summary_is_persisted_in_one_write() {
        let store = Arc::new(FlakyStore::default());
        let memory = memory_with(
            &[
                r#"{"lessons": ["check the weather"], "strategies": "start early", "timing": 45}"#,
                r#"{"more": "never stored"}"#,
            ],
            Arc::clone(&store) as Arc<dyn LongTermStore>,
        )
        .await;
        let plan = Plan::new(vec![PlanStep::new("Pack", "Pack food")]);
        let eval = evaluation();
        let episode = Episode { task: "picnic", plan: &plan, results: &[], evaluation: &eval };

        memory
            .summarize_and_store(&episode, &Context::new(), &groq())
            .await
            .unwrap();
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);

        // A failed write drops the whole episode, not part of it
        store.broken.store(true, Ordering::SeqCst);
        let err = memory
            .summarize_and_store(&episode, &Context::new(), &groq())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));
        assert_eq!(memory.get_long_term("more").await, None);
        assert_eq!(store.inner.load().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_summarize_rejects_non_object() {
        let memory = memory_with(&[r#"["not", "categories"]"#], Arc::new(InMemoryStore::new())).await;
        let plan = Plan::new(vec![PlanStep::new("Pack", "Pack food")]);
        let eval = evaluation();
        let episode = Episode { task: "picnic", plan: &plan, results: &[], evaluation: &eval };

        let err = memory
            .summarize_and_store(&episode, &Context::new(), &groq())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
        assert!(memory.long_term_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_summary_is_noop() {
        let memory = memory_with(&["{}"], Arc::new(InMemoryStore::new())).await;
        let plan = Plan::new(vec![PlanStep::new("Pack", "Pack food")]);
        let eval = evaluation();
        let episode = Episode { task: "picnic", plan: &plan, results: &[], evaluation: &eval };

        let written = memory
            .summarize_and_store(&episode, &Context::new(), &groq())
            .await
            .unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn test_retrieve_forwards_snapshot() {
        let store = InMemoryStore::with_entries(vec![MemoryEntry {
            key: "weather".into(),
            value: json!("check the forecast"),
            updated_at: 1,
        }]);
        let (gateway, provider) = scripted_gateway(&[
            r#"{"relevant_info": ["check the forecast"], "synthesis": "Weather matters"}"#,
        ]);
        let memory = Memory::load(gateway, Arc::new(store), SnapshotLimits::default())
            .await
            .unwrap();
        let mut scratch = ShortTermMemory::new();
        scratch.put("current_task", json!("plan a picnic"));

        let info = memory
            .retrieve_relevant_info("plan a picnic", &Context::new(), &scratch, &groq())
            .await
            .unwrap();

        assert_eq!(info.relevant_info, vec!["check the forecast"]);
        let prompt = provider.prompt(0);
        assert!(prompt.contains("check the forecast"));
        assert!(prompt.contains(r#"Short-term memory: {"current_task":"plan a picnic"}"#));
    }
}

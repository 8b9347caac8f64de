//! Long-term persistence backends
//!
//! A store loads and saves the whole long-term mapping at once. Entries are
//! ordered oldest write first; every backend preserves that order across a
//! save/load cycle so recency survives a restart.

use super::MemoryEntry;
use async_trait::async_trait;
use sdk::errors::PipelineError;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Whole-mapping persistence for long-term memory
#[async_trait]
pub trait LongTermStore: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Read the persisted mapping; an absent store is an empty mapping
    async fn load(&self) -> Result<Vec<MemoryEntry>, PipelineError>;

    /// Overwrite the persisted mapping
    async fn save(&self, entries: &[MemoryEntry]) -> Result<(), PipelineError>;
}

/// Single JSON document, one top-level key per category
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write never leaves a truncated document behind.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LongTermStore for JsonFileStore {
    fn name(&self) -> &str {
        "json"
    }

    async fn load(&self) -> Result<Vec<MemoryEntry>, PipelineError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PipelineError::Persistence(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let document: OrderedDocument = serde_json::from_str(&contents).map_err(|e| {
            PipelineError::Persistence(format!(
                "Memory file {} is not a JSON object: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(document
            .0
            .into_iter()
            .map(|(key, value)| MemoryEntry {
                key,
                value,
                updated_at: 0,
            })
            .collect())
    }

    async fn save(&self, entries: &[MemoryEntry]) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PipelineError::Persistence(format!("Failed to create memory directory: {}", e))
                })?;
            }
        }

        let body = serde_json::to_string_pretty(&OrderedDocumentRef(entries))
            .map_err(|e| PipelineError::Persistence(format!("Failed to encode memory: {}", e)))?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, body).await.map_err(|e| {
            PipelineError::Persistence(format!("Failed to write {}: {}", temp.display(), e))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            PipelineError::Persistence(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }
}

/// Volatile store for tests and throwaway runs
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`, oldest first
    pub fn with_entries(entries: Vec<MemoryEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl LongTermStore for InMemoryStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn load(&self) -> Result<Vec<MemoryEntry>, PipelineError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn save(&self, entries: &[MemoryEntry]) -> Result<(), PipelineError> {
        *self.entries.lock().await = entries.to_vec();
        Ok(())
    }
}

// A JSON object read and written in document order. serde_json's Map sorts
// keys, which would lose recency.
struct OrderedDocument(Vec<(String, Value)>);

struct OrderedDocumentRef<'a>(&'a [MemoryEntry]);

impl Serialize for OrderedDocumentRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in self.0 {
            map.serialize_entry(&entry.key, &entry.value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OrderedDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = OrderedDocument;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object of memory categories")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, Value)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    // Duplicate keys: last occurrence wins and takes its position
                    entries.retain(|(k, _)| k != &key);
                    entries.push((key, value));
                }
                Ok(OrderedDocument(entries))
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

use crate::keyword::KeywordIndex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Why a record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Messages evicted from a full context window.
    ContextArchive,
    /// A message/response pair judged significant.
    Interaction,
    /// Free-form knowledge written by callers.
    Knowledge,
}

/// A single long-term memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub kind: MemoryKind,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f64,
}

/// Long-term memory collaborator.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a record.
    async fn store(&self, record: MemoryRecord) -> ConclaveResult<()>;

    /// Up to `limit` records relevant to `query`, best first.
    async fn search(&self, query: &str, limit: usize) -> ConclaveResult<Vec<ScoredRecord>>;

    /// Number of stored records.
    async fn count(&self) -> ConclaveResult<usize>;
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<Uuid, MemoryRecord>,
    /// Record ids in write order.
    order: Vec<Uuid>,
    index: KeywordIndex,
}

/// In-memory store ranked with BM25.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    inner: RwLock<MemoryInner>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of the given kind, oldest first.
    pub async fn records_of(&self, kind: MemoryKind) -> Vec<MemoryRecord> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn store(&self, record: MemoryRecord) -> ConclaveResult<()> {
        let mut inner = self.inner.write().await;
        let id = record.id;
        inner.index.insert(id, &record.content);
        if inner.records.insert(id, record).is_none() {
            inner.order.push(id);
        }
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> ConclaveResult<Vec<ScoredRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .index
            .search(query, limit)
            .into_iter()
            .filter_map(|(id, score)| {
                inner.records.get(&id).map(|r| ScoredRecord {
                    record: r.clone(),
                    score,
                })
            })
            .collect())
    }

    async fn count(&self) -> ConclaveResult<usize> {
        Ok(self.inner.read().await.records.len())
    }
}

/// JSONL-backed store. Loads every record on open and appends on write.
pub struct FileMemoryStore {
    path: PathBuf,
    inner: InMemoryMemoryStore,
}

impl FileMemoryStore {
    pub async fn new(path: PathBuf) -> ConclaveResult<Self> {
        let inner = InMemoryMemoryStore::new();

        if path.exists() {
            let data = tokio::fs::read_to_string(&path).await?;
            for (line_no, line) in data.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: MemoryRecord = serde_json::from_str(line).map_err(|e| {
                    ConclaveError::Provider(format!(
                        "Invalid memory record at line {}: {e}",
                        line_no + 1
                    ))
                })?;
                inner.store(record).await?;
            }
            tracing::debug!(path = %path.display(), records = inner.count().await?, "Memory loaded");
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        Ok(Self { path, inner })
    }

    async fn append(&self, record: &MemoryRecord) -> ConclaveResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn store(&self, record: MemoryRecord) -> ConclaveResult<()> {
        self.append(&record).await?;
        self.inner.store(record).await
    }

    async fn search(&self, query: &str, limit: usize) -> ConclaveResult<Vec<ScoredRecord>> {
        self.inner.search(query, limit).await
    }

    async fn count(&self) -> ConclaveResult<usize> {
        self.inner.count().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_count() {
        let store = InMemoryMemoryStore::new();
        assert_eq!(store.count().await.unwrap(), 0);
        store
            .store(MemoryRecord::new(MemoryKind::Knowledge, "the api key rotates monthly"))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_first() {
        let store = InMemoryMemoryStore::new();
        store
            .store(MemoryRecord::new(MemoryKind::Interaction, "user prefers morning standups"))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new(MemoryKind::Knowledge, "standups moved to the morning slot for the morning crew"))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new(MemoryKind::Knowledge, "invoice totals"))
            .await
            .unwrap();

        let hits = store.search("morning standups", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.record.content.contains("standups")));
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_records_of_kind() {
        let store = InMemoryMemoryStore::new();
        store
            .store(MemoryRecord::new(MemoryKind::ContextArchive, "old turns"))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new(MemoryKind::Interaction, "important turn"))
            .await
            .unwrap();
        assert_eq!(store.records_of(MemoryKind::ContextArchive).await.len(), 1);
        assert_eq!(store.records_of(MemoryKind::Knowledge).await.len(), 0);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&MemoryKind::ContextArchive).unwrap();
        assert_eq!(json, "\"context_archive\"");
    }
}

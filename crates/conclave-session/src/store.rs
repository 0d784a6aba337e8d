use crate::state::ConversationState;
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Persistence collaborator for [`ConversationState`].
///
/// No atomicity is assumed beyond what an implementation provides.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, id: &str) -> ConclaveResult<Option<ConversationState>>;
    async fn save(&self, state: &ConversationState) -> ConclaveResult<()>;
    async fn delete(&self, id: &str) -> ConclaveResult<()>;
    async fn list(&self) -> ConclaveResult<Vec<String>>;
}

/// File-based state store: one pretty-printed JSON file per conversation.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub async fn new(dir: PathBuf) -> ConclaveResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(id)))
    }
}

/// Map a conversation id onto a safe file stem.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, id: &str) -> ConclaveResult<Option<ConversationState>> {
        let path = self.state_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let state: ConversationState = serde_json::from_str(&data)
            .map_err(|e| ConclaveError::Provider(format!("Failed to parse state '{id}': {e}")))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &ConversationState) -> ConclaveResult<()> {
        let path = self.state_path(&state.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(conversation = %state.id, turn = state.turn_count, "State saved");
        Ok(())
    }

    async fn delete(&self, id: &str) -> ConclaveResult<()> {
        let path = self.state_path(id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> ConclaveResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-memory state store.
#[derive(Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, id: &str) -> ConclaveResult<Option<ConversationState>> {
        Ok(self.states.read().await.get(id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> ConclaveResult<()> {
        self.states
            .write()
            .await
            .insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> ConclaveResult<()> {
        self.states.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> ConclaveResult<Vec<String>> {
        let mut ids: Vec<String> = self.states.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("conv-1_a"), "conv-1_a");
        assert_eq!(sanitize_id("../etc/passwd"), "___etc_passwd");
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryStateStore::new();
        assert!(store.load("a").await.unwrap().is_none());

        let mut state = ConversationState::new("a");
        state.record_turn();
        store.save(&state).await.unwrap();

        let loaded = store.load("a").await.unwrap().unwrap();
        assert_eq!(loaded.turn_count, 1);
        assert_eq!(store.list().await.unwrap(), vec!["a".to_string()]);

        store.delete("a").await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
    }
}

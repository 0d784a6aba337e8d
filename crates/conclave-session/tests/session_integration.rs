#![allow(clippy::unwrap_used, clippy::expect_used)]

use conclave_core::Message;
use conclave_session::{ConversationState, EmotionalState, FileStateStore, StateStore};

/// Helper: create a FileStateStore in a temp directory.
async fn temp_store() -> (FileStateStore, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(tmp.path().join("states")).await.unwrap();
    (store, tmp)
}

#[tokio::test]
async fn test_save_and_load_state() {
    let (store, _tmp) = temp_store().await;
    let state = ConversationState::new("conv-1");

    store.save(&state).await.unwrap();

    let loaded = store.load("conv-1").await.unwrap().unwrap();
    assert_eq!(loaded.id, "conv-1");
    assert_eq!(loaded.turn_count, 0);
}

#[tokio::test]
async fn test_load_nonexistent_returns_none() {
    let (store, _tmp) = temp_store().await;
    assert!(store.load("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_overwrites_previous_state() {
    let (store, _tmp) = temp_store().await;
    let mut state = ConversationState::new("conv-1");
    store.save(&state).await.unwrap();

    state.context_window.push(Message::user("Hello!"));
    state.context_window.push(Message::assistant("Hi there"));
    state.record_turn();
    store.save(&state).await.unwrap();

    let loaded = store.load("conv-1").await.unwrap().unwrap();
    assert_eq!(loaded.turn_count, 1);
    assert_eq!(loaded.context_window.len(), 2);
    assert_eq!(loaded.context_window[0].content, "Hello!");
    assert_eq!(loaded.context_window[1].content, "Hi there");
}

#[tokio::test]
async fn test_profile_and_emotion_persist() {
    let (store, _tmp) = temp_store().await;
    let mut state = ConversationState::new("conv-2");
    state
        .user_profile
        .preferences
        .insert("language".into(), serde_json::json!("es"));
    state.user_profile.record_interaction("asked about schedules");
    state.emotional_state = EmotionalState {
        user: "curious".into(),
        agent: "helpful".into(),
        confidence: 0.9,
    };
    state.set_flag("onboarded", true);
    store.save(&state).await.unwrap();

    let loaded = store.load("conv-2").await.unwrap().unwrap();
    assert_eq!(loaded.user_profile.preferences["language"], "es");
    assert_eq!(loaded.user_profile.interaction_history.len(), 1);
    assert_eq!(loaded.emotional_state, state.emotional_state);
    assert!(loaded.flag("onboarded"));
}

#[tokio::test]
async fn test_delete_and_list() {
    let (store, _tmp) = temp_store().await;
    store.save(&ConversationState::new("b")).await.unwrap();
    store.save(&ConversationState::new("a")).await.unwrap();

    assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);

    store.delete("a").await.unwrap();
    store.delete("never-existed").await.unwrap();
    assert_eq!(store.list().await.unwrap(), vec!["b"]);
}

#[tokio::test]
async fn test_persistence_across_store_instances() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("states");
    {
        let store = FileStateStore::new(dir.clone()).await.unwrap();
        let mut state = ConversationState::new("durable");
        state.record_turn();
        store.save(&state).await.unwrap();
    }
    let store = FileStateStore::new(dir).await.unwrap();
    let loaded = store.load("durable").await.unwrap().unwrap();
    assert_eq!(loaded.turn_count, 1);
}

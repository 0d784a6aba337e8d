use chrono::{DateTime, Utc};
use conclave_core::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum number of entries kept in [`UserProfile::interaction_history`].
pub const MAX_HISTORY_ENTRIES: usize = 50;

/// User/agent emotional labels reported by the AI capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    pub user: String,
    pub agent: String,
    pub confidence: f64,
}

impl Default for EmotionalState {
    fn default() -> Self {
        Self {
            user: "neutral".to_string(),
            agent: "neutral".to_string(),
            confidence: 0.0,
        }
    }
}

/// What the runtime has learned about the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub preferences: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub interaction_history: Vec<String>,
}

impl UserProfile {
    /// Append an interaction summary, evicting the oldest beyond the cap.
    pub fn record_interaction(&mut self, summary: impl Into<String>) {
        self.interaction_history.push(summary.into());
        if self.interaction_history.len() > MAX_HISTORY_ENTRIES {
            let excess = self.interaction_history.len() - MAX_HISTORY_ENTRIES;
            self.interaction_history.drain(..excess);
        }
    }
}

/// Persistent state of a single conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub turn_count: u64,
    pub last_interaction: DateTime<Utc>,
    /// Recent messages, oldest first.
    #[serde(default)]
    pub context_window: Vec<Message>,
    #[serde(default)]
    pub user_profile: UserProfile,
    #[serde(default)]
    pub emotional_state: EmotionalState,
    #[serde(default)]
    pub flags: HashMap<String, bool>,
    /// Pass-through variables owned by callers.
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl ConversationState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turn_count: 0,
            last_interaction: Utc::now(),
            context_window: Vec::new(),
            user_profile: UserProfile::default(),
            emotional_state: EmotionalState::default(),
            flags: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    /// Record one completed turn.
    pub fn record_turn(&mut self) {
        self.turn_count += 1;
        self.last_interaction = Utc::now();
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    pub fn set_flag(&mut self, name: impl Into<String>, value: bool) {
        self.flags.insert(name.into(), value);
    }
}

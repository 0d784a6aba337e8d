use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata key that marks an inbound message as important.
pub const IMPORTANT_KEY: &str = "important";

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction or synthetic runtime message.
    System,
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Where a message came from, with the routing fields each origin needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain conversational message, optionally tagged with its channel.
    #[default]
    Chat,
    /// Inbound message from a named messaging channel.
    Channel {
        /// Channel name used to route the reply.
        channel: String,
        /// Channel-specific sender identifier.
        sender_id: String,
    },
    /// Synthetic message produced by the task scheduler.
    ScheduledTask {
        /// Task being fired.
        task_id: String,
        /// Goal that owns the task.
        goal_id: String,
    },
    /// Team broadcast or collaboration post.
    Broadcast {
        /// Team the message was sent to.
        team_id: String,
        /// Agent id of the sender, when known.
        sender: Option<String>,
    },
    /// Work handed to a swarm agent.
    TaskAssignment {
        /// Task being assigned.
        task_id: String,
    },
}

/// A single message flowing through the runtime. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Origin of the message.
    #[serde(default)]
    pub kind: MessageKind,
    /// Pass-through key-value metadata attached to the message.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Creates a new chat message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Chat,
            metadata: HashMap::new(),
        }
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Sets the message origin.
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Marks the message as important.
    pub fn important(self) -> Self {
        self.with_metadata(IMPORTANT_KEY, serde_json::Value::Bool(true))
    }

    /// Whether the sender flagged this message as important.
    pub fn is_important(&self) -> bool {
        self.metadata
            .get(IMPORTANT_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Name of the channel this message arrived on, if any.
    pub fn channel(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Channel { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.kind, MessageKind::Chat);
        assert!(!msg.is_important());
    }

    #[test]
    fn test_important_flag() {
        let msg = Message::user("keep this").important();
        assert!(msg.is_important());

        let msg = Message::user("x").with_metadata(IMPORTANT_KEY, serde_json::json!("yes"));
        assert!(!msg.is_important(), "non-boolean flag is ignored");
    }

    #[test]
    fn test_kind_serialization() {
        let msg = Message::system("run task").with_kind(MessageKind::ScheduledTask {
            task_id: "t-1".into(),
            goal_id: "g-1".into(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"]["type"], "scheduled_task");
        assert_eq!(json["role"], "system");

        let parsed: Message = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.kind, msg.kind);
    }

    #[test]
    fn test_missing_kind_defaults_to_chat() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "role": "user",
            "content": "hi",
            "timestamp": Utc::now(),
        });
        let parsed: Message = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.kind, MessageKind::Chat);
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn test_channel_accessor() {
        let msg = Message::user("hi").with_kind(MessageKind::Channel {
            channel: "console".into(),
            sender_id: "u1".into(),
        });
        assert_eq!(msg.channel(), Some("console"));
        assert_eq!(Message::user("x").channel(), None);
    }
}

use crate::config::AgentIdentity;
use async_trait::async_trait;
use conclave_core::{ConclaveResult, Message};
use conclave_session::EmotionalState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata handed to the AI capability alongside the message and context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationMetadata {
    pub identity: AgentIdentity,
    pub conversation_id: String,
    pub turn: u64,
    /// Extra per-invocation fields (e.g. `recalled_memories`).
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// What the AI capability returns for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub confidence: f64,
    pub emotional_state: Option<EmotionalState>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AiResponse {
    pub fn text(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            confidence,
            emotional_state: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_emotion(mut self, state: EmotionalState) -> Self {
        self.emotional_state = Some(state);
        self
    }
}

/// The language-model capability consumed by the message loop.
///
/// Treated as a black box: retries and timeouts are the implementor's
/// concern. Failures should be reported as `ConclaveError::Provider`.
#[async_trait]
pub trait AiCapability: Send + Sync {
    async fn invoke(
        &self,
        message: &Message,
        context: &[Message],
        metadata: &InvocationMetadata,
    ) -> ConclaveResult<AiResponse>;
}

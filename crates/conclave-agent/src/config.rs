use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};

/// Who the agent is and what it may do; passed to every AI invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_conversation_id")]
    pub conversation_id: String,
    #[serde(default = "default_max_context_size")]
    pub max_context_size: usize,
    /// Memory hits attached to each invocation; 0 disables recall.
    #[serde(default)]
    pub memory_recall_limit: usize,
    #[serde(default)]
    pub identity: AgentIdentity,
}

fn default_conversation_id() -> String {
    "default".to_string()
}

fn default_max_context_size() -> usize {
    100
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            conversation_id: default_conversation_id(),
            max_context_size: default_max_context_size(),
            memory_recall_limit: 0,
            identity: AgentIdentity::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> ConclaveResult<()> {
        if self.conversation_id.trim().is_empty() {
            return Err(ConclaveError::Configuration(
                "conversation_id must not be empty".into(),
            ));
        }
        if self.max_context_size == 0 {
            return Err(ConclaveError::Configuration(
                "max_context_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the OpenAI-compatible capability backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    pub api_base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Confidence reported when the model does not return one.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    pub system_prompt: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_confidence() -> f64 {
    0.5
}

impl ModelConfig {
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
    }
}

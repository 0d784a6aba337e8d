use crate::capability::{AiCapability, AiResponse, InvocationMetadata};
use crate::config::ModelConfig;
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult, Message, Role};
use conclave_session::EmotionalState;
use tracing::debug;

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the chat completions API.
pub struct OpenAiCapability {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiCapability {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_messages(
        &self,
        message: &Message,
        context: &[Message],
        metadata: &InvocationMetadata,
    ) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = self.system_prompt(metadata) {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        // The window already ends with the message being answered.
        let already_in_context = context.last().is_some_and(|m| m.id == message.id);
        let history = context
            .iter()
            .chain((!already_in_context).then_some(message));

        for m in history {
            if m.role == Role::System {
                continue;
            }
            api_messages.push(serde_json::json!({
                "role": m.role.to_string(),
                "content": m.content
            }));
        }

        api_messages
    }

    fn system_prompt(&self, metadata: &InvocationMetadata) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(prompt) = &self.config.system_prompt {
            parts.push(prompt.clone());
        }
        if !metadata.identity.domain.is_empty() {
            parts.push(format!("Domain: {}", metadata.identity.domain));
        }
        if let Some(recalled) = metadata.extra.get("recalled_memories").and_then(|v| v.as_array()) {
            let lines: Vec<&str> = recalled.iter().filter_map(|v| v.as_str()).collect();
            if !lines.is_empty() {
                parts.push(format!("Relevant memories:\n{}", lines.join("\n")));
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

#[async_trait]
impl AiCapability for OpenAiCapability {
    async fn invoke(
        &self,
        message: &Message,
        context: &[Message],
        metadata: &InvocationMetadata,
    ) -> ConclaveResult<AiResponse> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": self.build_messages(message, context, metadata),
        });

        debug!(model = %self.config.model_id, turn = metadata.turn, "Invoking chat completions");

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ConclaveError::Provider(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ConclaveError::Provider(e.to_string()))?;

        if !status.is_success() {
            return Err(ConclaveError::Provider(format!(
                "OpenAI API error {status}: {resp_body}"
            )));
        }

        parse_openai_response(&resp_body, self.config.default_confidence)
    }
}

/// Extract an [`AiResponse`] from a chat completions body.
///
/// If the assistant content is itself a JSON object with a `content` field,
/// `metadata.confidence` and `metadata.emotional_state` are read from it;
/// otherwise the raw text is used with `default_confidence`.
pub fn parse_openai_response(
    body: &serde_json::Value,
    default_confidence: f64,
) -> ConclaveResult<AiResponse> {
    let Some(content) = body["choices"][0]["message"]["content"].as_str() else {
        return Err(ConclaveError::Provider(format!(
            "Response has no message content: {body}"
        )));
    };

    let structured = serde_json::from_str::<serde_json::Value>(content)
        .ok()
        .filter(|v| v["content"].is_string());

    let Some(structured) = structured else {
        return Ok(AiResponse::text(content, default_confidence));
    };

    let text = structured["content"].as_str().unwrap_or_default();
    let meta = &structured["metadata"];
    let confidence = meta["confidence"]
        .as_f64()
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(default_confidence);

    let mut response = AiResponse::text(text, confidence);
    if let Ok(emotion) = serde_json::from_value::<EmotionalState>(meta["emotional_state"].clone()) {
        response = response.with_emotion(emotion);
    }
    if let Some(obj) = meta.as_object() {
        for (key, value) in obj {
            if key != "confidence" && key != "emotional_state" {
                response.metadata.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]})
    }

    #[test]
    fn test_parse_plain_text_uses_default_confidence() {
        let resp = parse_openai_response(&completion("Hello!"), 0.5).unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.confidence, 0.5);
        assert!(resp.emotional_state.is_none());
    }

    #[test]
    fn test_parse_structured_content() {
        let inner = json!({
            "content": "Noted.",
            "metadata": {
                "confidence": 0.92,
                "emotional_state": {"user": "anxious", "agent": "calm", "confidence": 0.7},
                "topic": "billing"
            }
        })
        .to_string();
        let resp = parse_openai_response(&completion(&inner), 0.5).unwrap();
        assert_eq!(resp.content, "Noted.");
        assert_eq!(resp.confidence, 0.92);
        assert_eq!(resp.emotional_state.unwrap().user, "anxious");
        assert_eq!(resp.metadata["topic"], "billing");
    }

    #[test]
    fn test_parse_json_without_content_field_is_plain_text() {
        let resp = parse_openai_response(&completion(r#"{"answer": 42}"#), 0.3).unwrap();
        assert_eq!(resp.content, r#"{"answer": 42}"#);
        assert_eq!(resp.confidence, 0.3);
    }

    #[test]
    fn test_parse_missing_content_is_provider_error() {
        let err = parse_openai_response(&json!({"choices": []}), 0.5).unwrap_err();
        assert!(err.is_provider_failure());
    }

    #[test]
    fn test_build_messages_skips_duplicate_tail() {
        let capability = OpenAiCapability::new(ModelConfig {
            model_id: "m".into(),
            api_key: String::new(),
            api_base_url: None,
            temperature: 0.7,
            max_tokens: 16,
            default_confidence: 0.5,
            system_prompt: Some("Be brief.".into()),
        });
        let first = Message::user("hi");
        let reply = Message::assistant("hello");
        let current = Message::user("how are you");
        let context = vec![first, reply, current.clone()];

        let built = capability.build_messages(&current, &context, &InvocationMetadata::default());
        assert_eq!(built.len(), 4);
        assert_eq!(built[0]["role"], "system");
        assert_eq!(built[3]["content"], "how are you");

        let built = capability.build_messages(&current, &context[..2], &InvocationMetadata::default());
        assert_eq!(built.len(), 4);
        assert_eq!(built[3]["role"], "user");
    }
}

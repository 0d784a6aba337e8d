//! Heuristic deciding whether an exchange is worth a long-term memory write.

use crate::capability::AiResponse;
use conclave_core::Message;

/// Fragments that make any exchange significant when either text contains
/// one, ignoring case.
pub const SIGNIFICANT_KEYWORDS: [&str; 6] =
    ["important", "critical", "urgent", "remember", "key", "crucial"];

const CONFIDENCE_THRESHOLD: f64 = 0.8;

pub fn is_significant(message: &Message, response: &AiResponse) -> bool {
    response.confidence > CONFIDENCE_THRESHOLD
        || message.is_important()
        || response
            .emotional_state
            .as_ref()
            .is_some_and(|e| e.confidence > CONFIDENCE_THRESHOLD)
        || contains_keyword(&message.content)
        || contains_keyword(&response.content)
}

fn contains_keyword(text: &str) -> bool {
    let text = text.to_lowercase();
    SIGNIFICANT_KEYWORDS.iter().any(|k| text.contains(k))
}

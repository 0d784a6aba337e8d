use conclave_core::Message;

/// Bounded, ordered message history fed to the AI capability.
///
/// Appending past capacity evicts the oldest entries and hands them back to
/// the caller exactly once, in their original order, for archival.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    messages: Vec<Message>,
    max_messages: usize,
}

impl ContextWindow {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Rebuild a window from persisted messages. Anything beyond capacity is
    /// returned as overflow.
    pub fn restore(max_messages: usize, messages: Vec<Message>) -> (Self, Vec<Message>) {
        let mut window = Self {
            messages,
            max_messages: max_messages.max(1),
        };
        let overflow = window.evict_overflow();
        (window, overflow)
    }

    /// Append a message. Returns the evicted prefix (empty if none).
    #[must_use = "evicted messages must be archived"]
    pub fn push(&mut self, message: Message) -> Vec<Message> {
        self.messages.push(message);
        self.evict_overflow()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_messages
    }

    fn evict_overflow(&mut self) -> Vec<Message> {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess).collect()
        } else {
            Vec::new()
        }
    }
}

/// Textual record of an evicted segment: one `role: content` line per
/// message, oldest first.
pub fn archive_text(segment: &[Message]) -> String {
    segment
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

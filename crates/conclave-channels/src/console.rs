use crate::channel::Channel;
use async_trait::async_trait;
use conclave_core::{ConclaveResult, Message};
use parking_lot::Mutex;
use std::io::Write;

/// Writes each delivered message as a `role: content` line. Defaults to
/// stdout.
pub struct ConsoleChannel {
    name: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            name: "console".to_string(),
            out: Mutex::new(out),
        }
    }

    /// Register under a different channel name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, message: &Message) -> ConclaveResult<()> {
        let mut out = self.out.lock();
        writeln!(out, "{}: {}", message.role, message.content)?;
        out.flush()?;
        Ok(())
    }
}

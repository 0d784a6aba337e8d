use async_trait::async_trait;
use conclave_core::{ConclaveResult, Message};

/// An outbound messaging transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Name used for routing; matches `MessageKind::Channel::channel`.
    fn name(&self) -> &str;

    async fn deliver(&self, message: &Message) -> ConclaveResult<()>;
}

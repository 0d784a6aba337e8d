use crate::channel::Channel;
use conclave_core::{ConclaveError, ConclaveResult, Message};
use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Manages multiple outbound channels.
///
/// Replies are routed back to the channel named in their
/// `MessageKind::Channel`, sent to one channel by name, or broadcast to all
/// registered channels at once.
pub struct ChannelManager {
    channels: HashMap<String, Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Add a channel, replacing any channel registered under the same name.
    pub fn add_channel(&mut self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        if self.channels.insert(name.clone(), channel).is_some() {
            debug!(channel = %name, "Channel replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Channel> {
        self.channels.get(name).map(AsRef::as_ref)
    }

    /// Deliver a message to a specific channel.
    pub async fn deliver_to(&self, channel_name: &str, message: &Message) -> ConclaveResult<()> {
        let channel = self
            .channels
            .get(channel_name)
            .ok_or_else(|| ConclaveError::NotFound(format!("channel '{channel_name}'")))?;
        channel.deliver(message).await
    }

    /// Deliver a message to the channel named by its kind. Messages that
    /// did not come from a channel have nowhere to go.
    pub async fn route(&self, message: &Message) -> ConclaveResult<()> {
        let channel = message.channel().ok_or_else(|| {
            ConclaveError::Validation(format!("message {} has no channel to route to", message.id))
        })?;
        self.deliver_to(channel, message).await
    }

    /// Deliver to every channel concurrently. A failing channel does not
    /// stop the others; failures come back paired with the channel name.
    pub async fn broadcast(&self, message: &Message) -> Vec<(String, ConclaveError)> {
        let deliveries = self.channels.iter().map(|(name, channel)| async move {
            (name.clone(), channel.deliver(message).await)
        });

        let mut failures = Vec::new();
        for (name, outcome) in join_all(deliveries).await {
            if let Err(e) = outcome {
                warn!(channel = %name, error = %e, "Broadcast delivery failed");
                failures.push((name, e));
            }
        }
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        failures
    }

    /// Registered channel names, sorted.
    pub fn channel_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

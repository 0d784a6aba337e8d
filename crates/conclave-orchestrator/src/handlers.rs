use async_trait::async_trait;
use conclave_agent::MessageSender;
use conclave_core::{ConclaveResult, Message};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Receives messages addressed to one agent (team member or swarm agent).
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> ConclaveResult<()>;
}

/// Outcome of a fan-out delivery. Recipients appear in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    /// Recipient id and the error (or panic) its handler reported.
    pub failed: Vec<(String, String)>,
    /// Recipients with no registered handler.
    pub missing: Vec<String>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }
}

/// Per-agent handler registry shared by the swarm and team coordinators.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn AgentHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `agent_id`. Returns `true` if a
    /// previous handler was replaced.
    pub async fn register(&self, agent_id: impl Into<String>, handler: Arc<dyn AgentHandler>) -> bool {
        let agent_id = agent_id.into();
        debug!(agent_id = %agent_id, "Handler registered");
        self.handlers
            .write()
            .await
            .insert(agent_id, handler)
            .is_some()
    }

    pub async fn unregister(&self, agent_id: &str) -> bool {
        self.handlers.write().await.remove(agent_id).is_some()
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        self.handlers.read().await.contains_key(agent_id)
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }

    /// Deliver `message` to every recipient concurrently. Each handler runs
    /// in its own task, so an error or panic in one never affects the rest.
    pub async fn deliver(&self, recipients: &[String], message: &Message) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let targets: Vec<(String, Arc<dyn AgentHandler>)> = {
            let handlers = self.handlers.read().await;
            recipients
                .iter()
                .filter_map(|id| match handlers.get(id) {
                    Some(handler) => Some((id.clone(), Arc::clone(handler))),
                    None => {
                        warn!(agent_id = %id, "No handler registered; message not delivered");
                        report.missing.push(id.clone());
                        None
                    }
                })
                .collect()
        };

        let deliveries = targets.into_iter().map(|(id, handler)| {
            let message = message.clone();
            let task = tokio::spawn(async move { handler.handle(&message).await });
            async move { (id, task.await) }
        });

        for (id, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(Ok(())) => report.delivered.push(id),
                Ok(Err(e)) => {
                    warn!(agent_id = %id, error = %e, "Handler failed");
                    report.failed.push((id, e.to_string()));
                }
                Err(e) => {
                    warn!(agent_id = %id, error = %e, "Handler panicked");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }
}

/// Bridges an agent id to an [`conclave_agent::AgentRuntime`] by enqueueing
/// every delivered message into its loop.
pub struct QueueHandler {
    sender: MessageSender,
}

impl QueueHandler {
    pub fn new(sender: MessageSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl AgentHandler for QueueHandler {
    async fn handle(&self, message: &Message) -> ConclaveResult<()> {
        self.sender.send(message.clone())
    }
}

use crate::capability::{AiCapability, AiResponse, InvocationMetadata};
use crate::config::RuntimeConfig;
use crate::context::{archive_text, ContextWindow};
use crate::significance::is_significant;
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult, EventBus, Message, MessageKind, SubscriptionId};
use conclave_memory::{MemoryKind, MemoryRecord, MemoryStore};
use conclave_session::{ConversationState, StateStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Metadata key under which recalled memories are passed to the AI capability.
pub const RECALLED_MEMORIES_KEY: &str = "recalled_memories";

const SUMMARY_CHARS: usize = 120;

/// Lifecycle of an [`AgentRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Result of processing one inbound message.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub input: Message,
    pub response: Message,
    /// Messages evicted from the window and archived during this exchange.
    pub archived: usize,
    /// Whether the exchange was written to long-term memory as significant.
    pub significant: bool,
}

/// Notifications emitted by the runtime. Delivered synchronously to
/// subscribers on the task that produced them.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    Started,
    Paused,
    Resumed,
    Stopped,
    MessageProcessed(Exchange),
    Archived { segment_len: usize },
    Error {
        stage: String,
        message: String,
        /// Kind of the inbound message that failed; set for `process` only.
        input_kind: Option<MessageKind>,
    },
}

/// Work the runtime runs on a fixed interval while it is running.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &str;

    /// Run one cycle. Errors are reported as [`RuntimeEvent::Error`] and the
    /// next tick still fires.
    async fn tick(&self) -> ConclaveResult<()>;
}

/// FIFO of messages waiting for the loop, with a wake signal.
struct Inbox {
    queue: Mutex<VecDeque<Message>>,
    wake: Notify,
    closed: AtomicBool,
}

impl Inbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, message: Message) -> ConclaveResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConclaveError::Stopped);
        }
        self.queue.lock().push_back(message);
        self.wake.notify_one();
        Ok(())
    }

    fn pop(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Cloneable handle for enqueueing into a runtime from other components
/// (scheduler, channel adapters, team handlers).
#[derive(Clone)]
pub struct MessageSender {
    inbox: Arc<Inbox>,
}

impl MessageSender {
    pub fn send(&self, message: Message) -> ConclaveResult<()> {
        self.inbox.push(message)
    }
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender")
            .field("queued", &self.inbox.len())
            .finish()
    }
}

struct Conversation {
    state: ConversationState,
    window: ContextWindow,
}

struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

struct Inner {
    config: RuntimeConfig,
    ai: Option<Arc<dyn AiCapability>>,
    state_store: Option<Arc<dyn StateStore>>,
    memory: Option<Arc<dyn MemoryStore>>,
    inbox: Arc<Inbox>,
    lifecycle: Mutex<Lifecycle>,
    conversation: tokio::sync::Mutex<Conversation>,
    events: EventBus<RuntimeEvent>,
    jobs: Mutex<Vec<(Arc<dyn PeriodicJob>, Duration)>>,
    workers: Mutex<Option<Workers>>,
}

/// Builder for [`AgentRuntime`].
pub struct AgentRuntimeBuilder {
    config: RuntimeConfig,
    ai: Option<Arc<dyn AiCapability>>,
    state_store: Option<Arc<dyn StateStore>>,
    memory: Option<Arc<dyn MemoryStore>>,
}

impl AgentRuntimeBuilder {
    pub fn ai(mut self, ai: Arc<dyn AiCapability>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn build(self) -> AgentRuntime {
        let state = ConversationState::new(self.config.conversation_id.clone());
        let window = ContextWindow::new(self.config.max_context_size);
        AgentRuntime {
            inner: Arc::new(Inner {
                config: self.config,
                ai: self.ai,
                state_store: self.state_store,
                memory: self.memory,
                inbox: Arc::new(Inbox::new()),
                lifecycle: Mutex::new(Lifecycle::Idle),
                conversation: tokio::sync::Mutex::new(Conversation { state, window }),
                events: EventBus::new(),
                jobs: Mutex::new(Vec::new()),
                workers: Mutex::new(None),
            }),
        }
    }
}

/// The message loop: drains the inbound queue one message at a time,
/// maintains the bounded context window, invokes the AI capability, and
/// persists conversation state after every processed message.
///
/// Registered [`PeriodicJob`]s tick alongside the loop. Both stop between
/// iterations on pause or shutdown, never in the middle of one.
pub struct AgentRuntime {
    inner: Arc<Inner>,
}

impl AgentRuntime {
    pub fn builder(config: RuntimeConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            config,
            ai: None,
            state_store: None,
            memory: None,
        }
    }

    /// Load persisted state and start the loop and any registered jobs.
    ///
    /// Fails with `Configuration` if the AI capability or state store is
    /// missing. Calling it on a running or paused runtime is a no-op.
    pub async fn initialize(&self) -> ConclaveResult<()> {
        match self.lifecycle() {
            Lifecycle::Idle => {}
            Lifecycle::Stopped => return Err(ConclaveError::Stopped),
            Lifecycle::Running | Lifecycle::Paused => return Ok(()),
        }
        self.inner.config.validate()?;
        self.inner.require_collaborators()?;
        let store = self.inner.state_store()?;

        let conversation_id = &self.inner.config.conversation_id;
        let loaded = store.load(conversation_id).await?;
        let overflow = {
            let mut conv = self.inner.conversation.lock().await;
            let state = loaded.unwrap_or_else(|| ConversationState::new(conversation_id.clone()));
            let (window, overflow) =
                ContextWindow::restore(self.inner.config.max_context_size, state.context_window.clone());
            info!(
                conversation_id = %conversation_id,
                turn_count = state.turn_count,
                context_len = window.len(),
                "Conversation state loaded"
            );
            conv.state = state;
            conv.window = window;
            if !overflow.is_empty() {
                conv.state.context_window = conv.window.messages().to_vec();
            }
            overflow
        };
        self.inner.archive(overflow).await;

        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != Lifecycle::Idle {
                return Ok(());
            }
            *lifecycle = Lifecycle::Running;
        }
        self.inner.start_workers();
        info!(conversation_id = %conversation_id, "Runtime started");
        self.inner.events.emit(&RuntimeEvent::Started);
        Ok(())
    }

    /// Append a message to the inbound queue. Fails only after shutdown.
    pub fn enqueue(&self, message: Message) -> ConclaveResult<()> {
        self.inner.inbox.push(message)
    }

    pub fn sender(&self) -> MessageSender {
        MessageSender {
            inbox: Arc::clone(&self.inner.inbox),
        }
    }

    /// Run one loop iteration for `message` directly, bypassing the queue.
    pub async fn process_message(&self, message: Message) -> ConclaveResult<Exchange> {
        match self.lifecycle() {
            Lifecycle::Stopped => Err(ConclaveError::Stopped),
            Lifecycle::Idle => Err(ConclaveError::Configuration(
                "runtime not initialized".into(),
            )),
            Lifecycle::Running | Lifecycle::Paused => self.inner.process(message).await,
        }
    }

    /// Stop the loop and jobs after the current iteration, keeping queued
    /// messages, and persist state.
    pub async fn pause(&self) -> ConclaveResult<()> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Running => *lifecycle = Lifecycle::Paused,
                Lifecycle::Paused => return Ok(()),
                Lifecycle::Idle => {
                    return Err(ConclaveError::InvariantViolation(
                        "cannot pause a runtime that was never initialized".into(),
                    ))
                }
                Lifecycle::Stopped => return Err(ConclaveError::Stopped),
            }
        }
        self.inner.stop_workers().await;
        self.inner.save_best_effort().await;
        info!(queued = self.inner.inbox.len(), "Runtime paused");
        self.inner.events.emit(&RuntimeEvent::Paused);
        Ok(())
    }

    pub async fn resume(&self) -> ConclaveResult<()> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Paused => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Ok(()),
                Lifecycle::Idle => {
                    return Err(ConclaveError::InvariantViolation(
                        "cannot resume a runtime that was never initialized".into(),
                    ))
                }
                Lifecycle::Stopped => return Err(ConclaveError::Stopped),
            }
        }
        self.inner.start_workers();
        info!(queued = self.inner.inbox.len(), "Runtime resumed");
        self.inner.events.emit(&RuntimeEvent::Resumed);
        Ok(())
    }

    /// Stop the loop and jobs, persist final state, and reject further
    /// enqueues. A second call is a no-op.
    pub async fn shutdown(&self) -> ConclaveResult<()> {
        let previous = {
            let mut lifecycle = self.inner.lifecycle.lock();
            let previous = *lifecycle;
            *lifecycle = Lifecycle::Stopped;
            previous
        };
        if previous == Lifecycle::Stopped {
            debug!("Shutdown requested on a stopped runtime");
            return Ok(());
        }

        self.inner.inbox.closed.store(true, Ordering::Release);
        self.inner.stop_workers().await;
        if previous != Lifecycle::Idle {
            self.inner.save_best_effort().await;
        }
        let dropped = self.inner.inbox.len();
        if dropped > 0 {
            warn!(dropped, "Runtime stopped with unprocessed messages");
        }
        info!("Runtime stopped");
        self.inner.events.emit(&RuntimeEvent::Stopped);
        Ok(())
    }

    /// Attach a job ticking every `interval` while the runtime is running.
    pub fn register_job(&self, job: Arc<dyn PeriodicJob>, interval: Duration) -> ConclaveResult<()> {
        if interval.is_zero() {
            return Err(ConclaveError::Configuration(format!(
                "job '{}' needs a non-zero interval",
                job.name()
            )));
        }
        if self.lifecycle() == Lifecycle::Stopped {
            return Err(ConclaveError::Stopped);
        }
        info!(job = job.name(), interval_ms = interval.as_millis() as u64, "Job registered");
        // Lock order is `workers` then `jobs`, matching `start_workers`.
        let mut workers = self.inner.workers.lock();
        self.inner.jobs.lock().push((Arc::clone(&job), interval));
        if let Some(workers) = workers.as_mut() {
            let handle = tokio::spawn(run_job(
                Arc::clone(&self.inner),
                job,
                interval,
                workers.shutdown.subscribe(),
            ));
            workers.handles.push(handle);
        }
        Ok(())
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle.lock()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.inbox.len()
    }

    /// Snapshot of the current conversation state.
    pub async fn conversation_state(&self) -> ConversationState {
        let conv = self.inner.conversation.lock().await;
        let mut state = conv.state.clone();
        state.context_window = conv.window.messages().to_vec();
        state
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }
}

impl Drop for AgentRuntime {
    fn drop(&mut self) {
        if let Some(workers) = self.inner.workers.lock().take() {
            let _ = workers.shutdown.send(true);
        }
    }
}

impl Inner {
    fn require_collaborators(&self) -> ConclaveResult<()> {
        if self.ai.is_none() {
            return Err(ConclaveError::Configuration(
                "AI capability not configured".into(),
            ));
        }
        if self.state_store.is_none() {
            return Err(ConclaveError::Configuration("state store not configured".into()));
        }
        Ok(())
    }

    fn ai(&self) -> ConclaveResult<&Arc<dyn AiCapability>> {
        self.ai
            .as_ref()
            .ok_or_else(|| ConclaveError::Configuration("AI capability not configured".into()))
    }

    fn state_store(&self) -> ConclaveResult<&Arc<dyn StateStore>> {
        self.state_store
            .as_ref()
            .ok_or_else(|| ConclaveError::Configuration("state store not configured".into()))
    }

    fn start_workers(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        let (shutdown, rx) = watch::channel(false);
        let mut handles = vec![tokio::spawn(run_loop(Arc::clone(self), rx))];
        for (job, interval) in self.jobs.lock().iter() {
            handles.push(tokio::spawn(run_job(
                Arc::clone(self),
                Arc::clone(job),
                *interval,
                shutdown.subscribe(),
            )));
        }
        *workers = Some(Workers { shutdown, handles });
    }

    async fn stop_workers(&self) {
        let workers = self.workers.lock().take();
        let Some(workers) = workers else {
            return;
        };
        let _ = workers.shutdown.send(true);
        // Wake an idle loop so it observes the signal promptly.
        self.inbox.wake.notify_waiters();
        for handle in workers.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Runtime worker panicked");
            }
        }
    }

    async fn process(&self, message: Message) -> ConclaveResult<Exchange> {
        self.require_collaborators()?;
        let ai = Arc::clone(self.ai()?);

        let mut conv = self.conversation.lock().await;
        let mut archived = 0;

        let evicted = conv.window.push(message.clone());
        archived += evicted.len();
        self.archive(evicted).await;

        let metadata = InvocationMetadata {
            identity: self.config.identity.clone(),
            conversation_id: conv.state.id.clone(),
            turn: conv.state.turn_count + 1,
            extra: self.recall(&message.content).await,
        };

        debug!(turn = metadata.turn, context_len = conv.window.len(), "Invoking AI capability");
        let response = ai.invoke(&message, conv.window.messages(), &metadata).await?;

        let reply = reply_message(&message, &response);
        let evicted = conv.window.push(reply.clone());
        archived += evicted.len();
        self.archive(evicted).await;

        let significant = is_significant(&message, &response);
        {
            let window = conv.window.messages().to_vec();
            let state = &mut conv.state;
            state.record_turn();
            state.context_window = window;
            if let Some(emotion) = &response.emotional_state {
                state.emotional_state = emotion.clone();
            }
            state
                .user_profile
                .record_interaction(summarize(&message.content));
        }

        if significant {
            self.remember(&message, &response).await;
        }
        self.save(&conv.state).await;

        info!(
            turn = conv.state.turn_count,
            confidence = response.confidence,
            significant,
            archived,
            "Message processed"
        );

        let exchange = Exchange {
            input: message,
            response: reply,
            archived,
            significant,
        };
        drop(conv);
        self.events
            .emit(&RuntimeEvent::MessageProcessed(exchange.clone()));
        Ok(exchange)
    }

    async fn recall(&self, query: &str) -> std::collections::HashMap<String, serde_json::Value> {
        let mut extra = std::collections::HashMap::new();
        let limit = self.config.memory_recall_limit;
        let Some(memory) = self.memory.as_ref().filter(|_| limit > 0) else {
            return extra;
        };
        match memory.search(query, limit).await {
            Ok(hits) if !hits.is_empty() => {
                let recalled: Vec<serde_json::Value> = hits
                    .into_iter()
                    .map(|hit| serde_json::Value::String(hit.record.content))
                    .collect();
                extra.insert(
                    RECALLED_MEMORIES_KEY.to_string(),
                    serde_json::Value::Array(recalled),
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Memory recall failed; continuing without"),
        }
        extra
    }

    /// Hand an evicted segment to memory as one record. Attempted exactly
    /// once; a failure is reported and the segment is still dropped.
    async fn archive(&self, segment: Vec<Message>) {
        if segment.is_empty() {
            return;
        }
        let segment_len = segment.len();
        match &self.memory {
            Some(memory) => {
                let record = MemoryRecord::new(MemoryKind::ContextArchive, archive_text(&segment))
                    .with_metadata("segment_len", serde_json::json!(segment_len))
                    .with_metadata(
                        "conversation_id",
                        serde_json::json!(self.config.conversation_id),
                    );
                if let Err(e) = memory.store(record).await {
                    warn!(error = %e, segment_len, "Failed to archive context overflow");
                    self.events.emit(&RuntimeEvent::Error {
                        stage: "archive".into(),
                        message: e.to_string(),
                        input_kind: None,
                    });
                    return;
                }
                debug!(segment_len, "Context overflow archived");
            }
            None => debug!(segment_len, "Context overflow dropped; no memory store configured"),
        }
        self.events.emit(&RuntimeEvent::Archived { segment_len });
    }

    async fn remember(&self, message: &Message, response: &AiResponse) {
        let Some(memory) = &self.memory else {
            return;
        };
        let content = format!("{}: {}\nassistant: {}", message.role, message.content, response.content);
        let record = MemoryRecord::new(MemoryKind::Interaction, content)
            .with_metadata("confidence", serde_json::json!(response.confidence))
            .with_metadata(
                "conversation_id",
                serde_json::json!(self.config.conversation_id),
            );
        if let Err(e) = memory.store(record).await {
            warn!(error = %e, "Failed to store significant interaction");
        }
    }

    async fn save(&self, state: &ConversationState) {
        let Ok(store) = self.state_store() else {
            return;
        };
        if let Err(e) = store.save(state).await {
            warn!(conversation_id = %state.id, error = %e, "State save failed; continuing");
        }
    }

    async fn save_best_effort(&self) {
        let conv = self.conversation.lock().await;
        self.save(&conv.state).await;
    }
}

fn reply_message(input: &Message, response: &AiResponse) -> Message {
    let kind = match &input.kind {
        MessageKind::Channel { .. } => input.kind.clone(),
        _ => MessageKind::Chat,
    };
    let mut reply = Message::assistant(response.content.clone())
        .with_kind(kind)
        .with_metadata("confidence", serde_json::json!(response.confidence))
        .with_metadata("in_reply_to", serde_json::json!(input.id));
    for (key, value) in &response.metadata {
        reply.metadata.entry(key.clone()).or_insert_with(|| value.clone());
    }
    reply
}

fn summarize(content: &str) -> String {
    if content.chars().count() <= SUMMARY_CHARS {
        content.to_string()
    } else {
        let cut: String = content.chars().take(SUMMARY_CHARS).collect();
        format!("{cut}...")
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    debug!("Message loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match inner.inbox.pop() {
            Some(message) => {
                let message_id = message.id;
                let kind = message.kind.clone();
                if let Err(e) = inner.process(message).await {
                    error!(message_id = %message_id, error = %e, "Message processing failed");
                    inner.events.emit(&RuntimeEvent::Error {
                        stage: "process".into(),
                        message: e.to_string(),
                        input_kind: Some(kind),
                    });
                }
            }
            None => {
                tokio::select! {
                    _ = inner.inbox.wake.notified() => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    debug!("Message loop exited");
}

async fn run_job(
    inner: Arc<Inner>,
    job: Arc<dyn PeriodicJob>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; cycles start one interval in.
    ticker.tick().await;
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if let Err(e) = job.tick().await {
            warn!(job = job.name(), error = %e, "Periodic job failed");
            inner.events.emit(&RuntimeEvent::Error {
                stage: format!("job:{}", job.name()),
                message: e.to_string(),
                input_kind: None,
            });
        }
    }
    debug!(job = job.name(), "Periodic job stopped");
}

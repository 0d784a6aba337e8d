//! Message loop, bounded context window, and AI capability interface.
//!
//! # Main types
//!
//! - [`AgentRuntime`]: The message loop with lifecycle, persistence, and periodic jobs.
//! - [`AiCapability`]: Trait implemented by language-model backends.
//! - [`ContextWindow`]: Bounded message history that yields its overflow for archival.
//! - [`OpenAiCapability`]: OpenAI-compatible chat completions backend.

pub mod backends;
pub mod capability;
pub mod config;
pub mod context;
pub mod runtime;
pub mod significance;

pub use backends::OpenAiCapability;
pub use capability::{AiCapability, AiResponse, InvocationMetadata};
pub use config::{AgentIdentity, ModelConfig, RuntimeConfig};
pub use context::{archive_text, ContextWindow};
pub use runtime::{
    AgentRuntime, AgentRuntimeBuilder, Exchange, Lifecycle, MessageSender, PeriodicJob,
    RuntimeEvent, RECALLED_MEMORIES_KEY,
};
pub use significance::is_significant;

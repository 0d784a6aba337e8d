//! Core types and error definitions for the Conclave agent runtime.
//!
//! This crate provides the foundational types shared across all Conclave crates,
//! including the error taxonomy, message representations, and the event bus
//! used for observer-style notifications.
//!
//! # Main types
//!
//! - [`ConclaveError`]: Unified error enum for all Conclave subsystems.
//! - [`ConclaveResult`]: Convenience alias for `Result<T, ConclaveError>`.
//! - [`Role`]: Message role (system, user, assistant).
//! - [`Message`]: A single immutable message flowing through the runtime.
//! - [`MessageKind`]: Tagged description of where a message came from.
//! - [`EventBus`]: Synchronous subscribe/unsubscribe notification hub.

/// Subscription-based event delivery.
pub mod events;
/// Message and role types.
pub mod message;

pub use events::{EventBus, SubscriptionId};
pub use message::{Message, MessageKind, Role};

// --- Error types ---

/// Top-level error type for the Conclave runtime.
///
/// Precondition failures (`Configuration`, `CapacityExceeded`,
/// `InvariantViolation`, `Validation`, `NotFound`) are raised before any
/// mutation takes place. `Provider` wraps failures reported by external
/// collaborators (AI capability, state store, memory store).
#[derive(Debug, thiserror::Error)]
pub enum ConclaveError {
    /// A required collaborator or setting is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A pool is already at its maximum size.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The operation would break a structural invariant.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Input failed validation; nothing was stored.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced team, task, decision, or agent does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A failure propagated from an external collaborator.
    #[error("Provider failure: {0}")]
    Provider(String),

    /// The runtime has been shut down and no longer accepts work.
    #[error("Runtime stopped")]
    Stopped,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConclaveError {
    /// Whether this error came from an external collaborator rather than a
    /// local precondition check.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Io(_) | Self::Json(_))
    }
}

/// A convenience `Result` alias using [`ConclaveError`].
pub type ConclaveResult<T> = Result<T, ConclaveError>;

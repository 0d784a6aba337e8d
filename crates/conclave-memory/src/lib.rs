//! Long-term memory for the Conclave runtime.
//!
//! Used for context-overflow archival and significant-interaction logging.
//!
//! # Main types
//!
//! - [`MemoryStore`]: Trait for storing records and searching them by text.
//! - [`InMemoryMemoryStore`]: Process-local store ranked with BM25.
//! - [`FileMemoryStore`]: JSONL-backed persistent store.
//! - [`KeywordIndex`]: BM25 scorer shared by both stores.

/// BM25 keyword index.
pub mod keyword;
/// Memory record types and store implementations.
pub mod store;

pub use keyword::KeywordIndex;
pub use store::{
    FileMemoryStore, InMemoryMemoryStore, MemoryKind, MemoryRecord, MemoryStore, ScoredRecord,
};

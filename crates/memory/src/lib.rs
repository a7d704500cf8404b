//! Per-user long-term memory.
//!
//! One Markdown file per user (`MEMORY.md`) holding upsertable fact and
//! preference sections, plus the recall seam the enrichment pass queries.
//! The vector index is an external collaborator; the default recall here is
//! a keyword scorer over the same file.

pub mod parse;
pub mod recall;
pub mod store;

pub use parse::{
    auto_capture_facts, capture_preferences, parse_memory_update, MemoryFact, PreferenceSignal,
};
pub use recall::{KeywordRecall, MemoryRecall, RecallDiagnostics, RecallHit};
pub use store::MemoryFileStore;

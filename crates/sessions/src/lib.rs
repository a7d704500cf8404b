//! Session and transcript runtime.
//!
//! A session is one `(session key → conversation)` binding with token
//! counters; its transcript is an append-only JSONL file. The engine reads
//! history most-recent-first, appends exactly two turns per chat turn
//! (user first, then assistant), and never edits prior turns.

pub mod history;
pub mod keys;
pub mod store;
pub mod transcript;

pub use history::{limit_transcript_turns, transcript_to_chat_messages};
pub use keys::{derive_conversation_id, normalize_user_context_id, resolve_user_context_id};
pub use store::{SessionContext, SessionEntry, SessionStore};
pub use transcript::{TranscriptStore, TranscriptTurn};

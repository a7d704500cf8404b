//! Session store.
//!
//! Maps session keys to conversations and token counters, persisted as
//! `sessions.json` under the state path. Writes for one user are serialized
//! by the store's lock; the transcript itself lives in [`TranscriptStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use nova_domain::error::{Error, Result};
use nova_domain::stream::Usage;

use crate::keys::derive_conversation_id;
use crate::transcript::{TranscriptStore, TranscriptTurn};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_key: String,
    pub conversation_id: String,
    pub user_context_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Everything the engine needs about a session for one turn: the resolved
/// conversation plus its most-recent-first transcript.
pub struct SessionContext {
    pub conversation_id: String,
    pub user_context_id: String,
    /// Most recent turn first.
    pub recent_turns: Vec<TranscriptTurn>,
    transcripts: Arc<TranscriptStore>,
}

impl SessionContext {
    /// Append one turn to this conversation's transcript.
    pub fn append_turn(&self, turn: &TranscriptTurn) -> Result<()> {
        self.transcripts.append(&self.conversation_id, turn)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    sessions_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    transcripts: Arc<TranscriptStore>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions/`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let sessions_path = dir.join("sessions.json");
        let sessions = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        let transcripts = Arc::new(TranscriptStore::new(&dir.join("transcripts"))?);

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            sessions: RwLock::new(sessions),
            transcripts,
        })
    }

    /// Resolve the session context for a turn, creating the session on first
    /// contact. When `conversation_id` is absent it is derived from
    /// `(source, sender)`.
    pub fn resolve_session_context(
        &self,
        session_key: &str,
        user_context_id: &str,
        conversation_id: Option<&str>,
        source: &str,
        sender_id: &str,
    ) -> Result<SessionContext> {
        let conversation_id = {
            let sessions = self.sessions.read();
            match sessions.get(session_key) {
                Some(entry) => entry.conversation_id.clone(),
                None => conversation_id
                    .map(String::from)
                    .unwrap_or_else(|| derive_conversation_id(source, sender_id)),
            }
        };

        {
            let mut sessions = self.sessions.write();
            sessions
                .entry(session_key.to_owned())
                .or_insert_with(|| SessionEntry {
                    session_key: session_key.to_owned(),
                    conversation_id: conversation_id.clone(),
                    user_context_id: user_context_id.to_owned(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                    input_tokens: 0,
                    output_tokens: 0,
                    total_tokens: 0,
                });
        }

        let recent_turns = self.transcripts.read_recent_first(&conversation_id)?;

        Ok(SessionContext {
            conversation_id,
            user_context_id: user_context_id.to_owned(),
            recent_turns,
            transcripts: Arc::clone(&self.transcripts),
        })
    }

    /// Add a completed turn's token usage to the session counters.
    pub fn persist_usage(&self, session_key: &str, usage: &Usage) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.input_tokens += usage.prompt_tokens as u64;
            entry.output_tokens += usage.completion_tokens as u64;
            entry.total_tokens += (usage.prompt_tokens + usage.completion_tokens) as u64;
            entry.updated_at = Utc::now();
        }
    }

    pub fn get(&self, session_key: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Persist the session table to disk.
    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        let json = serde_json::to_string_pretty(&*sessions)?;
        std::fs::write(&self.sessions_path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn first_contact_derives_conversation_id() {
        let (_dir, store) = store();
        let ctx = store
            .resolve_session_context("s1", "alice", None, "telegram", "42")
            .unwrap();
        assert_eq!(ctx.conversation_id, "conv:telegram:42");
        assert!(ctx.recent_turns.is_empty());
    }

    #[test]
    fn existing_session_keeps_its_conversation() {
        let (_dir, store) = store();
        store
            .resolve_session_context("s1", "alice", Some("conv:explicit"), "hud", "x")
            .unwrap();
        // A later turn without a conversation id stays in the same one.
        let ctx = store
            .resolve_session_context("s1", "alice", None, "hud", "x")
            .unwrap();
        assert_eq!(ctx.conversation_id, "conv:explicit");
    }

    #[test]
    fn turns_append_in_order() {
        let (_dir, store) = store();
        let ctx = store
            .resolve_session_context("s1", "alice", None, "hud", "x")
            .unwrap();
        ctx.append_turn(&TranscriptTurn::user("q")).unwrap();
        ctx.append_turn(&TranscriptTurn::assistant("a")).unwrap();

        let ctx = store
            .resolve_session_context("s1", "alice", None, "hud", "x")
            .unwrap();
        assert_eq!(ctx.recent_turns[0].role, "assistant");
        assert_eq!(ctx.recent_turns[1].role, "user");
    }

    #[test]
    fn usage_accumulates_on_session() {
        let (_dir, store) = store();
        store
            .resolve_session_context("s1", "alice", None, "hud", "x")
            .unwrap();
        store.persist_usage(
            "s1",
            &Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        );
        store.persist_usage(
            "s1",
            &Usage {
                prompt_tokens: 2,
                completion_tokens: 1,
                total_tokens: 3,
            },
        );
        let entry = store.get("s1").unwrap();
        assert_eq!(entry.input_tokens, 12);
        assert_eq!(entry.output_tokens, 6);
        assert_eq!(entry.total_tokens, 18);
    }

    #[test]
    fn flush_roundtrips_sessions_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path()).unwrap();
            store
                .resolve_session_context("s1", "alice", None, "hud", "x")
                .unwrap();
            store.flush().unwrap();
        }
        let store = SessionStore::new(dir.path()).unwrap();
        assert!(store.get("s1").is_some());
    }
}

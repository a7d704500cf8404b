//! Append-only JSONL transcripts.
//!
//! Each conversation gets a `<conversation_id>.jsonl` file under the base
//! directory. One line per turn; malformed lines are skipped on read so a
//! torn write never poisons a conversation.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use nova_domain::error::{Error, Result};
use nova_domain::stream::Usage;

/// One persisted transcript turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub text: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// NLP preprocessor diagnostics, opaque to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nlp: Option<serde_json::Value>,
}

impl TranscriptTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            text: text.into(),
            timestamp: Utc::now().to_rfc3339(),
            provider: None,
            model: None,
            usage: None,
            nlp: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            ..Self::user(text)
        }
    }
}

/// Reads and appends JSONL transcript files.
pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(Error::Io)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.base_dir.join(format!("{conversation_id}.jsonl"))
    }

    /// Append one turn to a conversation's transcript.
    pub fn append(&self, conversation_id: &str, turn: &TranscriptTurn) -> Result<()> {
        use std::io::Write;

        let json = serde_json::to_string(turn)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(conversation_id))
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;
        Ok(())
    }

    /// Read a conversation's turns, most recent first.
    pub fn read_recent_first(&self, conversation_id: &str) -> Result<Vec<TranscriptTurn>> {
        let path = self.path_for(conversation_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut turns = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptTurn>(line) {
                Ok(turn) => turns.push(turn),
                Err(e) => {
                    tracing::warn!(
                        conversation_id,
                        error = %e,
                        "skipping malformed transcript line"
                    );
                }
            }
        }
        turns.reverse();
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_is_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();

        store.append("c1", &TranscriptTurn::user("first")).unwrap();
        store
            .append("c1", &TranscriptTurn::assistant("second"))
            .unwrap();

        let turns = store.read_recent_first("c1").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "second");
        assert_eq!(turns[0].role, "assistant");
        assert_eq!(turns[1].text, "first");
    }

    #[test]
    fn missing_conversation_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        assert!(store.read_recent_first("ghost").unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        store.append("c1", &TranscriptTurn::user("ok")).unwrap();
        std::fs::write(
            dir.path().join("c1.jsonl"),
            format!(
                "{}\nnot json at all\n",
                serde_json::to_string(&TranscriptTurn::user("ok")).unwrap()
            ),
        )
        .unwrap();

        let turns = store.read_recent_first("c1").unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "ok");
    }

    #[test]
    fn usage_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        let mut turn = TranscriptTurn::assistant("reply");
        turn.model = Some("gpt-4o-mini".into());
        turn.usage = Some(Usage {
            prompt_tokens: 3,
            completion_tokens: 2,
            total_tokens: 5,
        });
        store.append("c1", &turn).unwrap();

        let turns = store.read_recent_first("c1").unwrap();
        assert_eq!(turns[0].usage.unwrap().total_tokens, 5);
        assert_eq!(turns[0].model.as_deref(), Some("gpt-4o-mini"));
    }
}

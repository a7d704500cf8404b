//! The per-user `MEMORY.md` file store.
//!
//! Layout:
//!
//! ```markdown
//! # MEMORY
//!
//! ## Facts
//!
//! - **home-city**: lives in Pittsburgh _(updated 2026-08-01)_
//!
//! ## Preferences
//!
//! - **skill:weather**: prefers celsius _(updated 2026-08-01)_
//! ```
//!
//! Upserts match on the bolded key and replace the line in place; unknown
//! keys append to their section. The file is rewritten atomically per
//! upsert: memory writes are rare compared to turns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;

use nova_domain::error::{Error, Result};

const FACTS_HEADER: &str = "## Facts";
const PREFERENCES_HEADER: &str = "## Preferences";

/// A parsed memory entry: `key → (text, updated)`.
pub type Section = BTreeMap<String, (String, String)>;

pub struct MemoryFileStore {
    base_dir: PathBuf,
    entry_re: Regex,
    /// Serializes read-modify-write cycles per process; per-user writes are
    /// already serialized by session key upstream.
    write_lock: Mutex<()>,
}

impl MemoryFileStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(Error::Io)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            entry_re: Regex::new(r"^- \*\*(?P<key>[^*]+)\*\*: (?P<text>.*?)(?: _\(updated (?P<updated>[^)]+)\)_)?$")
                .expect("static regex"),
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, user_context_id: &str) -> PathBuf {
        self.base_dir.join(user_context_id).join("MEMORY.md")
    }

    /// Parse a user's memory file into its fact and preference sections.
    pub fn load(&self, user_context_id: &str) -> Result<(Section, Section)> {
        let path = self.path_for(user_context_id);
        if !path.exists() {
            return Ok((Section::new(), Section::new()));
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        Ok(self.parse(&raw))
    }

    fn parse(&self, raw: &str) -> (Section, Section) {
        let mut facts = Section::new();
        let mut preferences = Section::new();
        let mut current: Option<&mut Section> = None;

        for line in raw.lines() {
            let trimmed = line.trim_end();
            if trimmed == FACTS_HEADER {
                current = Some(&mut facts);
                continue;
            }
            if trimmed == PREFERENCES_HEADER {
                current = Some(&mut preferences);
                continue;
            }
            if trimmed.starts_with("## ") {
                current = None;
                continue;
            }
            let Some(section) = current.as_deref_mut() else {
                continue;
            };
            if let Some(caps) = self.entry_re.captures(trimmed) {
                section.insert(
                    caps["key"].to_string(),
                    (
                        caps["text"].to_string(),
                        caps.name("updated")
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_default(),
                    ),
                );
            }
        }

        (facts, preferences)
    }

    fn render(facts: &Section, preferences: &Section) -> String {
        let mut out = String::from("# MEMORY\n");
        for (header, section) in [(FACTS_HEADER, facts), (PREFERENCES_HEADER, preferences)] {
            if section.is_empty() {
                continue;
            }
            out.push('\n');
            out.push_str(header);
            out.push_str("\n\n");
            for (key, (text, updated)) in section {
                if updated.is_empty() {
                    out.push_str(&format!("- **{key}**: {text}\n"));
                } else {
                    out.push_str(&format!("- **{key}**: {text} _(updated {updated})_\n"));
                }
            }
        }
        out
    }

    fn upsert(
        &self,
        user_context_id: &str,
        key: &str,
        text: &str,
        into_preferences: bool,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();

        let (mut facts, mut preferences) = self.load(user_context_id)?;
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let target = if into_preferences {
            &mut preferences
        } else {
            &mut facts
        };
        target.insert(key.to_string(), (text.to_string(), today));

        let path = self.path_for(user_context_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        std::fs::write(&path, Self::render(&facts, &preferences)).map_err(Error::Io)?;

        tracing::debug!(user = user_context_id, key, "memory upsert");
        Ok(())
    }

    /// Insert or replace one fact.
    pub fn upsert_fact(&self, user_context_id: &str, key: &str, text: &str) -> Result<()> {
        self.upsert(user_context_id, key, text, false)
    }

    /// Insert or replace one preference signal.
    pub fn upsert_preference(&self, user_context_id: &str, key: &str, text: &str) -> Result<()> {
        self.upsert(user_context_id, key, text, true)
    }

    /// All fact and preference texts, used by recall and prompt sections.
    pub fn all_entries(&self, user_context_id: &str) -> Result<Vec<(String, String)>> {
        let (facts, preferences) = self.load(user_context_id)?;
        Ok(facts
            .into_iter()
            .chain(preferences)
            .map(|(key, (text, _))| (key, text))
            .collect())
    }

    /// Render the top `max` preference texts as a prompt section body.
    pub fn preference_section(&self, user_context_id: &str, max: usize) -> Result<String> {
        let (_, preferences) = self.load(user_context_id)?;
        Ok(preferences
            .iter()
            .take(max)
            .map(|(key, (text, _))| format!("- {key}: {text}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MemoryFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryFileStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn upsert_creates_and_replaces() {
        let (_dir, store) = store();
        store.upsert_fact("alice", "home-city", "lives in Boston").unwrap();
        store
            .upsert_fact("alice", "home-city", "lives in Pittsburgh")
            .unwrap();
        store.upsert_fact("alice", "coffee", "oat milk").unwrap();

        let (facts, _) = store.load("alice").unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts["home-city"].0, "lives in Pittsburgh");
    }

    #[test]
    fn preferences_live_in_their_own_section() {
        let (_dir, store) = store();
        store.upsert_fact("alice", "f1", "fact text").unwrap();
        store
            .upsert_preference("alice", "skill:weather", "prefers celsius")
            .unwrap();

        let (facts, preferences) = store.load("alice").unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(preferences.len(), 1);
        assert_eq!(preferences["skill:weather"].0, "prefers celsius");
    }

    #[test]
    fn rendered_file_parses_back() {
        let (dir, store) = store();
        store.upsert_fact("alice", "k", "v").unwrap();
        let raw = std::fs::read_to_string(dir.path().join("alice/MEMORY.md")).unwrap();
        assert!(raw.starts_with("# MEMORY"));
        assert!(raw.contains("## Facts"));
        assert!(raw.contains("- **k**: v _(updated "));
    }

    #[test]
    fn users_are_isolated() {
        let (_dir, store) = store();
        store.upsert_fact("alice", "k", "alice's").unwrap();
        store.upsert_fact("bob", "k", "bob's").unwrap();
        let (alice, _) = store.load("alice").unwrap();
        assert_eq!(alice["k"].0, "alice's");
        let (bob, _) = store.load("bob").unwrap();
        assert_eq!(bob["k"].0, "bob's");
    }

    #[test]
    fn missing_user_loads_empty() {
        let (_dir, store) = store();
        let (facts, preferences) = store.load("ghost").unwrap();
        assert!(facts.is_empty());
        assert!(preferences.is_empty());
    }

    #[test]
    fn preference_section_renders_bullets() {
        let (_dir, store) = store();
        store.upsert_preference("alice", "tone", "keep it brief").unwrap();
        let body = store.preference_section("alice", 5).unwrap();
        assert_eq!(body, "- tone: keep it brief");
    }
}

//! Per-session pending confirmations.
//!
//! One map for the whole process: `session_key → pending`, at most one entry
//! per kind per session, TTL ≈ 10 minutes. Losing this state is tolerable;
//! the next turn just re-requests confirmation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKind {
    Mission,
    Weather,
}

#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub kind: PendingKind,
    /// The prompt being confirmed (mission description, weather question).
    pub prompt: String,
    pub suggested_location: Option<String>,
    created: Instant,
}

pub struct PendingStore {
    ttl: Duration,
    entries: Mutex<HashMap<(String, PendingKind), PendingConfirmation>>,
}

impl PendingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The default 10-minute store.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(600))
    }

    /// Arm (or overwrite) the pending confirmation of `kind` for a session.
    pub fn set(
        &self,
        session_key: &str,
        kind: PendingKind,
        prompt: impl Into<String>,
        suggested_location: Option<String>,
    ) {
        self.entries.lock().insert(
            (session_key.to_string(), kind),
            PendingConfirmation {
                kind,
                prompt: prompt.into(),
                suggested_location,
                created: Instant::now(),
            },
        );
    }

    /// Read the pending confirmation, purging it if expired.
    pub fn get(&self, session_key: &str, kind: PendingKind) -> Option<PendingConfirmation> {
        let mut entries = self.entries.lock();
        let key = (session_key.to_string(), kind);
        match entries.get(&key) {
            Some(entry) if entry.created.elapsed() < self.ttl => Some(entry.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn clear(&self, session_key: &str, kind: PendingKind) {
        self.entries
            .lock()
            .remove(&(session_key.to_string(), kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear_roundtrip() {
        let store = PendingStore::with_default_ttl();
        store.set("s1", PendingKind::Weather, "what's the weather", None);
        let pending = store.get("s1", PendingKind::Weather).unwrap();
        assert_eq!(pending.prompt, "what's the weather");
        store.clear("s1", PendingKind::Weather);
        assert!(store.get("s1", PendingKind::Weather).is_none());
    }

    #[test]
    fn kinds_are_independent() {
        let store = PendingStore::with_default_ttl();
        store.set("s1", PendingKind::Weather, "w", None);
        store.set("s1", PendingKind::Mission, "m", None);
        assert!(store.get("s1", PendingKind::Weather).is_some());
        assert!(store.get("s1", PendingKind::Mission).is_some());
        store.clear("s1", PendingKind::Weather);
        assert!(store.get("s1", PendingKind::Mission).is_some());
    }

    #[test]
    fn write_overwrites() {
        let store = PendingStore::with_default_ttl();
        store.set("s1", PendingKind::Mission, "old", None);
        store.set("s1", PendingKind::Mission, "new", None);
        assert_eq!(store.get("s1", PendingKind::Mission).unwrap().prompt, "new");
    }

    #[test]
    fn expired_entries_purge_on_read() {
        let store = PendingStore::new(Duration::from_millis(0));
        store.set("s1", PendingKind::Weather, "w", None);
        std::thread::sleep(Duration::from_millis(2));
        assert!(store.get("s1", PendingKind::Weather).is_none());
    }

    #[test]
    fn sessions_are_isolated() {
        let store = PendingStore::with_default_ttl();
        store.set("s1", PendingKind::Weather, "w", None);
        assert!(store.get("s2", PendingKind::Weather).is_none());
    }
}

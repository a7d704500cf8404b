//! Duplicate-inbound filter.
//!
//! Debounces identical consecutive utterances from the same
//! `(source, sender, user, session)` within a short TTL. Carve-outs
//! (explicit crypto reports, mission builds, follow-up cues) are the
//! dispatcher's call: this store only answers "seen recently?".

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

pub struct DedupeFilter {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupeFilter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Default window: 5 seconds, comfortably covering double-taps and
    /// transport retries without swallowing genuine repeats.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(5))
    }

    fn fingerprint(source: &str, sender: &str, user: &str, session: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [source, sender, user, session] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(text.trim().to_lowercase().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns `true` when this exact utterance from this origin was already
    /// seen inside the TTL. Always refreshes the entry.
    pub fn check_and_touch(
        &self,
        source: &str,
        sender: &str,
        user: &str,
        session: &str,
        text: &str,
    ) -> bool {
        let key = Self::fingerprint(source, sender, user, session, text);
        let now = Instant::now();
        let mut seen = self.seen.lock();

        // Lazy cleanup once the map grows past any plausible live set.
        if seen.len() > 10_000 {
            seen.retain(|_, ts| now.duration_since(*ts) < self.ttl);
        }

        let duplicate = seen
            .get(&key)
            .is_some_and(|ts| now.duration_since(*ts) < self.ttl);
        seen.insert(key, now);
        duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_within_ttl_is_duplicate() {
        let filter = DedupeFilter::with_default_ttl();
        assert!(!filter.check_and_touch("hud", "a", "u", "s", "hey nova"));
        assert!(filter.check_and_touch("hud", "a", "u", "s", "hey nova"));
    }

    #[test]
    fn normalization_ignores_case_and_padding() {
        let filter = DedupeFilter::with_default_ttl();
        assert!(!filter.check_and_touch("hud", "a", "u", "s", "Hey Nova"));
        assert!(filter.check_and_touch("hud", "a", "u", "s", "  hey nova  "));
    }

    #[test]
    fn origin_components_scope_the_key() {
        let filter = DedupeFilter::with_default_ttl();
        assert!(!filter.check_and_touch("hud", "a", "u", "s", "hey"));
        assert!(!filter.check_and_touch("voice", "a", "u", "s", "hey"));
        assert!(!filter.check_and_touch("hud", "b", "u", "s", "hey"));
        assert!(!filter.check_and_touch("hud", "a", "u", "s2", "hey"));
    }

    #[test]
    fn expired_entries_are_not_duplicates() {
        let filter = DedupeFilter::new(Duration::from_millis(0));
        assert!(!filter.check_and_touch("hud", "a", "u", "s", "hey"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(!filter.check_and_touch("hud", "a", "u", "s", "hey"));
    }
}

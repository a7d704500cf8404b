//! Short-term context: per-(user, conversation, domain) follow-up slots.
//!
//! Lets refinements like "make it 8am instead" route back to the mission
//! draft (or the crypto report) they belong to without re-asking. Entries
//! expire lazily on read.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Domains and state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextDomain {
    Assistant,
    MissionTask,
    Crypto,
}

#[derive(Debug, Clone)]
pub struct ContextState {
    pub topic_affinity_id: String,
    pub slots: HashMap<String, String>,
    pub last_user_excerpt: String,
    pub last_assistant_excerpt: String,
    pub ts: Instant,
}

impl ContextState {
    pub fn new(topic_affinity_id: impl Into<String>) -> Self {
        Self {
            topic_affinity_id: topic_affinity_id.into(),
            slots: HashMap::new(),
            last_user_excerpt: String::new(),
            last_assistant_excerpt: String::new(),
            ts: Instant::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Domain policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CANCEL_CUES: &[&str] = &[
    "cancel", "never mind", "nevermind", "forget it", "forget that", "drop it", "stop that",
];

const FOLLOW_UP_OPENERS: &[&str] = &[
    "and ", "also ", "what about", "how about", "make it", "change it", "change that",
    "instead", "actually", "same but", "add ",
];

const NEW_TOPIC_OPENERS: &[&str] = &[
    "what is", "what's", "who is", "who's", "tell me about", "explain", "write",
    "create", "search", "how do",
];

/// Mission refinements that look like detail fills rather than new asks.
const MISSION_DETAIL_WORDS: &[&str] = &[
    "telegram", "discord", "email", "hud", "daily", "weekly", "hourly", "o'clock",
];

/// `8am`, `9:30 pm`, `every morning`: schedule-shaped detail fills.
fn mission_detail_cue(lowered: &str) -> bool {
    if lowered
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '\'')
        .any(|word| MISSION_DETAIL_WORDS.contains(&word))
    {
        return true;
    }
    if lowered.contains("every ") {
        return true;
    }
    regex::Regex::new(r"\b\d{1,2}(?::\d{2})?\s*(?:am|pm)\b")
        .expect("static regex")
        .is_match(lowered)
}

/// Per-domain classification of a follow-up utterance.
#[derive(Debug, Clone, Copy)]
pub struct DomainPolicy {
    pub domain: ContextDomain,
}

impl DomainPolicy {
    pub fn for_domain(domain: ContextDomain) -> Self {
        Self { domain }
    }

    pub fn is_cancel(&self, text: &str) -> bool {
        let lowered = text.trim().to_lowercase();
        CANCEL_CUES.iter().any(|c| lowered.starts_with(c) || lowered == *c)
    }

    pub fn is_new_topic(&self, text: &str) -> bool {
        let lowered = text.trim().to_lowercase();
        NEW_TOPIC_OPENERS.iter().any(|c| lowered.starts_with(c))
    }

    /// A short refinement that should merge into the existing context
    /// rather than start a fresh turn.
    pub fn is_non_critical_follow_up(&self, text: &str) -> bool {
        let lowered = text.trim().to_lowercase();
        if self.is_cancel(&lowered) || self.is_new_topic(&lowered) {
            return false;
        }
        if lowered.split_whitespace().count() > 14 {
            return false;
        }
        let opener_hit = FOLLOW_UP_OPENERS.iter().any(|c| lowered.starts_with(c));
        match self.domain {
            ContextDomain::MissionTask => opener_hit || mission_detail_cue(&lowered),
            ContextDomain::Crypto => {
                opener_hit
                    || lowered.contains("what about")
                    || crate::fastpath::crypto::detect(&lowered)
            }
            ContextDomain::Assistant => opener_hit,
        }
    }

    /// Stable topic slug for affinity tracking.
    pub fn resolve_topic_affinity_id(&self, text: &str) -> String {
        let words: Vec<String> = text
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .take(4)
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
            })
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            "general".to_string()
        } else {
            words.join("-")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Key = (String, String, ContextDomain);

pub struct ShortTermStore {
    ttl: Duration,
    entries: Mutex<HashMap<Key, ContextState>>,
}

impl ShortTermStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(900))
    }

    fn key(user: &str, conversation: &str, domain: ContextDomain) -> Key {
        (user.to_string(), conversation.to_string(), domain)
    }

    /// Newest entry for the triple; absence is normal. Expired entries are
    /// removed on read.
    pub fn get(&self, user: &str, conversation: &str, domain: ContextDomain) -> Option<ContextState> {
        let mut entries = self.entries.lock();
        let key = Self::key(user, conversation, domain);
        match entries.get(&key) {
            Some(state) if state.ts.elapsed() < self.ttl => Some(state.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn upsert(&self, user: &str, conversation: &str, domain: ContextDomain, state: ContextState) {
        self.entries
            .lock()
            .insert(Self::key(user, conversation, domain), state);
    }

    pub fn clear(&self, user: &str, conversation: &str, domain: ContextDomain) {
        self.entries
            .lock()
            .remove(&Self::key(user, conversation, domain));
    }

    /// The "primary" non-assistant context: mission vs crypto, newest wins,
    /// mission wins an exact timestamp tie (`ts >=`).
    pub fn primary_context(
        &self,
        user: &str,
        conversation: &str,
    ) -> Option<(ContextDomain, ContextState)> {
        let mission = self.get(user, conversation, ContextDomain::MissionTask);
        let crypto = self.get(user, conversation, ContextDomain::Crypto);
        match (mission, crypto) {
            (Some(m), Some(c)) => {
                if m.ts >= c.ts {
                    Some((ContextDomain::MissionTask, m))
                } else {
                    Some((ContextDomain::Crypto, c))
                }
            }
            (Some(m), None) => Some((ContextDomain::MissionTask, m)),
            (None, Some(c)) => Some((ContextDomain::Crypto, c)),
            (None, None) => None,
        }
    }
}

//! Parsing memory-update phrases and preference signals out of utterances.

use regex::Regex;

/// A fact extracted from an `update your memory …` utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFact {
    pub key: String,
    pub text: String,
}

/// A preference captured implicitly from an utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceSignal {
    pub key: String,
    pub text: String,
}

/// Parse `update your memory: <fact>` (also accepts `that`/`with` joiners).
/// Returns `None` when the phrase is absent or the fact body is empty.
pub fn parse_memory_update(text: &str) -> Option<MemoryFact> {
    let re = Regex::new(r"(?i)^\s*update\s+your\s+memory\s*(?::|that|with|-)?\s*(?P<fact>.+)$")
        .expect("static regex");
    let caps = re.captures(text.trim())?;
    let fact = caps["fact"].trim().trim_end_matches('.').trim();
    if fact.is_empty() {
        return None;
    }
    Some(MemoryFact {
        key: slug_key(fact),
        text: fact.to_string(),
    })
}

/// Derive a stable upsert key from the first words of a fact, so restating
/// the same fact replaces the old entry instead of piling up duplicates.
fn slug_key(fact: &str) -> String {
    fact.split_whitespace()
        .filter(|w| !is_stopword(w))
        .take(3)
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn is_stopword(word: &str) -> bool {
    matches!(
        word.to_lowercase().trim_matches(|c: char| !c.is_ascii_alphanumeric()),
        "i" | "my" | "the" | "a" | "an" | "that" | "is" | "am" | "to" | "of"
    )
}

/// Capture self-descriptive facts stated in passing (`my name is …`,
/// `i live in …`, `i work at …`). These upsert into the Facts section
/// without an explicit memory-update phrase.
pub fn auto_capture_facts(text: &str) -> Vec<MemoryFact> {
    let mut facts = Vec::new();
    let patterns: &[(&str, &str)] = &[
        (r"(?i)\bmy name is ([a-z][a-z '-]{1,40})", "name"),
        (r"(?i)\bi live in ([a-z][a-z ,.'-]{1,60})", "home"),
        (r"(?i)\bi work at ([a-z0-9][a-z0-9 ,.&'-]{1,60})", "workplace"),
        (r"(?i)\bmy birthday is ([a-z0-9][a-z0-9 ,/-]{1,30})", "birthday"),
    ];
    for (pattern, key) in patterns {
        let re = Regex::new(pattern).expect("static regex");
        if let Some(caps) = re.captures(text) {
            let value = caps[1]
                .trim()
                .trim_end_matches(['.', ',', '!', '?'])
                .trim()
                .to_string();
            if !value.is_empty() {
                facts.push(MemoryFact {
                    key: (*key).to_string(),
                    text: format!("{key}: {value}"),
                });
            }
        }
    }
    facts
}

/// Capture explicit preference statements from an utterance.
///
/// Recognized shapes: `call me <name>`, `always <directive>`, `never
/// <directive>`, `i prefer <directive>`. Conservative on purpose: a missed
/// capture costs nothing, a wrong one pollutes the prompt every turn.
pub fn capture_preferences(text: &str) -> Vec<PreferenceSignal> {
    let mut signals = Vec::new();
    let lowered = text.to_lowercase();

    let call_me = Regex::new(r"(?i)\bcall me ([a-z][a-z0-9 _-]{1,30})").expect("static regex");
    if let Some(caps) = call_me.captures(&lowered) {
        signals.push(PreferenceSignal {
            key: "address-as".into(),
            text: format!("wants to be called {}", caps[1].trim()),
        });
    }

    for (marker, key) in [
        ("always ", "always"),
        ("never ", "never"),
        ("i prefer ", "prefers"),
    ] {
        if let Some(pos) = lowered.find(marker) {
            let directive = lowered[pos + marker.len()..]
                .split(['.', ',', '!', '?'])
                .next()
                .unwrap_or("")
                .trim();
            if directive.len() >= 3 && directive.len() <= 120 {
                signals.push(PreferenceSignal {
                    key: format!("{key}:{}", slug_key(directive)),
                    text: format!("{key} {directive}"),
                });
            }
        }
    }

    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_update_basic_forms() {
        for text in [
            "update your memory: I live in Pittsburgh",
            "Update your memory that I live in Pittsburgh",
            "update your memory - I live in Pittsburgh.",
        ] {
            let fact = parse_memory_update(text).unwrap();
            assert_eq!(fact.text, "I live in Pittsburgh");
            assert_eq!(fact.key, "live-in-pittsburgh");
        }
    }

    #[test]
    fn memory_update_rejects_non_matches() {
        assert!(parse_memory_update("what's in your memory?").is_none());
        assert!(parse_memory_update("update your memory:").is_none());
    }

    #[test]
    fn restated_fact_keeps_the_same_key() {
        let a = parse_memory_update("update your memory: I live in Pittsburgh").unwrap();
        let b = parse_memory_update("update your memory that i live in pittsburgh now").unwrap();
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn preference_capture_call_me() {
        let signals = capture_preferences("Please call me Captain from now on");
        assert_eq!(signals[0].key, "address-as");
        assert!(signals[0].text.contains("captain"));
    }

    #[test]
    fn preference_capture_always_never() {
        let signals = capture_preferences("always answer in metric units. never use emoji!");
        let keys: Vec<&str> = signals.iter().map(|s| s.key.as_str()).collect();
        assert!(keys.iter().any(|k| k.starts_with("always:")));
        assert!(keys.iter().any(|k| k.starts_with("never:")));
    }

    #[test]
    fn plain_chat_captures_nothing() {
        assert!(capture_preferences("what's the weather like").is_empty());
    }

    #[test]
    fn auto_capture_finds_self_facts() {
        let facts = auto_capture_facts("By the way, my name is Dana and I live in Pittsburgh.");
        let keys: Vec<&str> = facts.iter().map(|f| f.key.as_str()).collect();
        assert!(keys.contains(&"name"));
        assert!(keys.contains(&"home"));
        let home = facts.iter().find(|f| f.key == "home").unwrap();
        assert_eq!(home.text, "home: Pittsburgh");
    }

    #[test]
    fn auto_capture_ignores_questions() {
        assert!(auto_capture_facts("what's the capital of France?").is_empty());
    }
}

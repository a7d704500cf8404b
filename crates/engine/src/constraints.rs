//! Strict output constraints: parsing directives from user text and
//! validating replies against them.

use regex::Regex;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConstraints {
    pub one_word: bool,
    pub exact_bullet_count: Option<usize>,
    pub json_only: bool,
    pub required_json_keys: Vec<String>,
    pub sentence_count: Option<usize>,
}

/// Why a reply failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    NotOneWord,
    BulletCount { expected: usize, actual: usize },
    BulletShape,
    NotJson,
    JsonFenced,
    JsonKeys { expected: Vec<String>, actual: Vec<String> },
    SentenceCount { expected: usize, actual: usize },
}

impl std::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintViolation::NotOneWord => write!(f, "reply is not a single word"),
            ConstraintViolation::BulletCount { expected, actual } => {
                write!(f, "expected exactly {expected} bullets, got {actual}")
            }
            ConstraintViolation::BulletShape => {
                write!(f, "every non-empty line must start with \"- \"")
            }
            ConstraintViolation::NotJson => write!(f, "reply does not parse as JSON"),
            ConstraintViolation::JsonFenced => write!(f, "reply wraps JSON in markdown fences"),
            ConstraintViolation::JsonKeys { expected, actual } => write!(
                f,
                "top-level keys must be exactly {expected:?}, got {actual:?}"
            ),
            ConstraintViolation::SentenceCount { expected, actual } => {
                write!(f, "expected exactly {expected} sentence(s), got {actual}")
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn word_to_count(word: &str) -> Option<usize> {
    match word {
        "one" | "1" => Some(1),
        "two" | "2" => Some(2),
        "three" | "3" => Some(3),
        "four" | "4" => Some(4),
        "five" | "5" => Some(5),
        "six" | "6" => Some(6),
        "seven" | "7" => Some(7),
        "eight" | "8" => Some(8),
        "nine" | "9" => Some(9),
        "ten" | "10" => Some(10),
        _ => word.parse().ok().filter(|n| *n > 0 && *n <= 50),
    }
}

impl OutputConstraints {
    /// Parse strict-format directives out of the user text.
    pub fn parse(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let mut constraints = Self::default();

        let one_word =
            Regex::new(r"\b(?:in |with |use )?(?:exactly )?one[ -]word\b").expect("static regex");
        constraints.one_word = one_word.is_match(&lowered);

        let bullets = Regex::new(r"exactly (\w+) bullet(?: point)?s?").expect("static regex");
        if let Some(caps) = bullets.captures(&lowered) {
            constraints.exact_bullet_count = word_to_count(&caps[1]);
        }

        let json_only =
            Regex::new(r"\b(?:respond |reply |answer )?(?:with |in )?json only\b|\bonly json\b")
                .expect("static regex");
        if json_only.is_match(&lowered) {
            constraints.json_only = true;
            let keys =
                Regex::new(r"(?:with )?keys? ([a-z0-9_]+(?:\s*(?:,|and)\s*[a-z0-9_]+)*)")
                    .expect("static regex");
            if let Some(caps) = keys.captures(&lowered) {
                constraints.required_json_keys = caps[1]
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .map(str::trim)
                    .filter(|s| !s.is_empty() && *s != "and")
                    .map(String::from)
                    .collect();
            }
        }

        let sentences =
            Regex::new(r"exactly (\w+) sentences?\b|\bin (one|two) sentences?\b")
                .expect("static regex");
        if let Some(caps) = sentences.captures(&lowered) {
            let word = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
            constraints.sentence_count = word.and_then(word_to_count);
        }

        constraints
    }

    pub fn is_active(&self) -> bool {
        self.one_word
            || self.exact_bullet_count.is_some()
            || self.json_only
            || self.sentence_count.is_some()
    }

    /// Render the strict-requirements prompt section. Empty when inactive.
    pub fn instructions(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        if self.one_word {
            lines.push("Reply with exactly one word. No punctuation, no explanation.".into());
        }
        if let Some(n) = self.exact_bullet_count {
            lines.push(format!(
                "Reply with exactly {n} bullet points. Every line must start with \"- \". No other text."
            ));
        }
        if self.json_only {
            if self.required_json_keys.is_empty() {
                lines.push(
                    "Reply with raw JSON only. No markdown fences, no surrounding text.".into(),
                );
            } else {
                lines.push(format!(
                    "Reply with raw JSON only. No markdown fences. The top-level object must have exactly these keys: {}.",
                    self.required_json_keys.join(", ")
                ));
            }
        }
        if let Some(n) = self.sentence_count {
            lines.push(format!("Reply in exactly {n} sentence(s)."));
        }
        lines.join("\n")
    }

    // ── Validation ─────────────────────────────────────────────────

    /// Structural conformance check for a finished reply.
    pub fn validate(&self, reply: &str) -> Result<(), ConstraintViolation> {
        if self.one_word {
            validate_one_word(reply)?;
        }
        if let Some(expected) = self.exact_bullet_count {
            validate_bullets(reply, expected)?;
        }
        if self.json_only {
            validate_json_only(reply, &self.required_json_keys)?;
        }
        if let Some(expected) = self.sentence_count {
            validate_sentences(reply, expected)?;
        }
        Ok(())
    }
}

fn validate_one_word(reply: &str) -> Result<(), ConstraintViolation> {
    let cleaned = reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(['.', '!', '?', ','])
        .trim();
    let mut words = cleaned.split_whitespace();
    match (words.next(), words.next()) {
        (Some(w), None) if !w.is_empty() => Ok(()),
        _ => Err(ConstraintViolation::NotOneWord),
    }
}

fn validate_bullets(reply: &str, expected: usize) -> Result<(), ConstraintViolation> {
    let lines: Vec<&str> = reply.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.iter().any(|l| !l.trim_start().starts_with("- ")) {
        return Err(ConstraintViolation::BulletShape);
    }
    if lines.len() != expected {
        return Err(ConstraintViolation::BulletCount {
            expected,
            actual: lines.len(),
        });
    }
    Ok(())
}

fn validate_json_only(reply: &str, required_keys: &[String]) -> Result<(), ConstraintViolation> {
    if reply.contains("```") {
        return Err(ConstraintViolation::JsonFenced);
    }
    let value: serde_json::Value =
        serde_json::from_str(reply.trim()).map_err(|_| ConstraintViolation::NotJson)?;
    if !required_keys.is_empty() {
        let Some(object) = value.as_object() else {
            return Err(ConstraintViolation::NotJson);
        };
        let mut actual: Vec<String> = object.keys().cloned().collect();
        let mut expected: Vec<String> = required_keys.to_vec();
        actual.sort();
        expected.sort();
        if actual != expected {
            return Err(ConstraintViolation::JsonKeys { expected, actual });
        }
    }
    Ok(())
}

fn validate_sentences(reply: &str, expected: usize) -> Result<(), ConstraintViolation> {
    let actual = reply
        .split(['.', '!', '?'])
        .filter(|fragment| fragment.trim().chars().any(|c| c.is_alphanumeric()))
        .count();
    if actual != expected {
        return Err(ConstraintViolation::SentenceCount { expected, actual });
    }
    Ok(())
}

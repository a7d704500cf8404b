//! Key derivation for sessions and users.

/// Derive a stable conversation id when the transport did not supply one.
///
/// Shape: `conv:<source>:<sender>`. The same `(source, sender)` pair always
/// lands in the same conversation, so follow-ups keep their history.
pub fn derive_conversation_id(source: &str, sender_id: &str) -> String {
    format!(
        "conv:{}:{}",
        sanitize_segment(source),
        sanitize_segment(sender_id)
    )
}

/// Normalize a user-context id: trimmed, lowercased, path-safe.
/// Empty input maps to `"default"`.
pub fn normalize_user_context_id(raw: &str) -> String {
    let cleaned = sanitize_segment(raw);
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// Resolve an optional user-context id to a concrete one.
pub fn resolve_user_context_id(raw: Option<&str>) -> String {
    normalize_user_context_id(raw.unwrap_or(""))
}

fn sanitize_segment(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_stable_and_safe() {
        assert_eq!(
            derive_conversation_id("Telegram", "User 42"),
            "conv:telegram:user_42"
        );
        assert_eq!(
            derive_conversation_id("Telegram", "User 42"),
            derive_conversation_id("telegram", "user 42"),
        );
    }

    #[test]
    fn user_context_id_normalization() {
        assert_eq!(normalize_user_context_id("  Alice  "), "alice");
        assert_eq!(normalize_user_context_id("a/b\\c"), "a_b_c");
        assert_eq!(normalize_user_context_id(""), "default");
        assert_eq!(resolve_user_context_id(None), "default");
        assert_eq!(resolve_user_context_id(Some("Bob")), "bob");
    }
}

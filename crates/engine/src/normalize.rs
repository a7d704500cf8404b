//! Reply normalization: strip tool-invocation artifacts and source-metadata
//! lines, repair broken readability, and decide emptiness.

use regex::Regex;

/// Clean a raw model reply for user display. Returns an empty string when
/// nothing user-facing survives: the caller then climbs the fallback
/// ladder.
pub fn normalize_reply(raw: &str) -> String {
    let invocation_re =
        Regex::new(r#"(?m)^\s*(?:<tool_call>.*|\{"tool_call".*|tool_call:.*|function_call:.*)$"#)
            .expect("static regex");
    let source_meta_re =
        Regex::new(r"(?mi)^\s*(?:source|sources|citation)s?\s*:\s*.*$|^\s*\[source:[^\]]*\]\s*$")
            .expect("static regex");

    let mut text = invocation_re.replace_all(raw, "").to_string();
    text = source_meta_re.replace_all(&text, "").to_string();

    // Strip a leading transcript-style speaker label.
    if let Some(stripped) = text.trim_start().strip_prefix("Assistant:") {
        text = stripped.to_string();
    }

    // Repair bullet lines that lost their space ("-item" → "- item").
    let bullet_re = Regex::new(r"(?m)^-(?P<first>\S)").expect("static regex");
    text = bullet_re.replace_all(&text, "- $first").to_string();

    // Collapse runs of blank lines left behind by the removals.
    let blank_re = Regex::new(r"\n{3,}").expect("static regex");
    text = blank_re.replace_all(&text, "\n\n").to_string();

    text.trim().to_string()
}

/// Whether a reply asserts it has no live-web access (the refusal-recovery
/// trigger).
pub fn claims_no_web_access(reply: &str) -> bool {
    let lowered = reply.to_lowercase();
    [
        "i don't have access to the internet",
        "i don't have internet access",
        "i cannot browse the web",
        "i can't browse the web",
        "no access to real-time information",
        "i don't have real-time access",
        "i cannot access live",
        "i can't access live",
    ]
    .iter()
    .any(|phrase| lowered.contains(phrase))
}

//! Turn policy and execution policy.
//!
//! The turn policy is derived purely from the utterance: no I/O. The
//! execution policy is the intersection of that with the tools actually
//! available from the initialized runtime.

use nova_domain::config::ToolLoopConfig;
use regex::Regex;

use crate::fastpath;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct TurnPolicy {
    pub fast_lane_simple_chat: bool,
    pub weather_intent: bool,
    pub crypto_intent: bool,
    pub tool_loop_candidate: bool,
    pub memory_recall_candidate: bool,
    /// Capability hints feeding the execution policy.
    pub has_url: bool,
    pub web_search_intent: bool,
    pub dont_browse: bool,
}

const FAST_LANE_MAX_CHARS: usize = 42;
const FAST_LANE_MAX_WORDS: usize = 8;

const FAST_LANE_GREETINGS: &[&str] = &[
    "hi", "hey", "hello", "yo", "sup", "howdy", "good morning", "good afternoon",
    "good evening", "good night", "morning", "evening", "thanks", "thank you",
    "ok", "okay", "cool", "nice", "great",
];

const FAST_LANE_BLOCKED: &[&str] = &[
    "weather", "crypto", "bitcoin", "search", "http", "mission", "play", "remind",
    "memory", "email", "gmail", "price", "news",
];

fn is_fast_lane(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() > FAST_LANE_MAX_CHARS {
        return false;
    }
    if trimmed.split_whitespace().count() > FAST_LANE_MAX_WORDS {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    if FAST_LANE_BLOCKED.iter().any(|kw| lowered.contains(kw)) {
        return false;
    }
    let stripped = lowered
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string();
    FAST_LANE_GREETINGS.iter().any(|g| {
        stripped == *g
            || stripped.starts_with(&format!("{g} "))
            || stripped.starts_with(&format!("{g},"))
    })
}

fn url_re() -> Regex {
    Regex::new(r"https?://[^\s)>\]]+").expect("static regex")
}

const WEB_SEARCH_CUES: &[&str] = &[
    "search for", "search the web", "look up", "google", "latest news", "current news",
    "what's the latest", "whats the latest", "find out what", "current price",
    "happening today", "right now in the news",
];

const DONT_BROWSE_CUES: &[&str] = &[
    "don't browse", "dont browse", "don't search", "dont search", "without searching",
    "no web search", "from memory only", "without the internet",
];

const COMMAND_CUES: &[&str] = &[
    "run the", "execute", "check my repo", "open the repo", "use the tool", "forward the email",
    "reply to the email", "draft a reply",
];

const MEMORY_RECALL_CUES: &[&str] = &[
    "remember", "do you recall", "what did i", "what's my", "whats my", "my name",
    "last time we", "you told me", "i told you",
];

impl TurnPolicy {
    /// Derive the policy from the raw utterance. Pure: no I/O, no clock.
    pub fn derive(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let has_url = url_re().is_match(text);
        let web_search_intent = WEB_SEARCH_CUES.iter().any(|c| lowered.contains(c));
        let dont_browse = DONT_BROWSE_CUES.iter().any(|c| lowered.contains(c));
        let command_intent = COMMAND_CUES.iter().any(|c| lowered.contains(c));

        let tool_loop_candidate =
            !dont_browse && (has_url || web_search_intent || command_intent);

        Self {
            fast_lane_simple_chat: is_fast_lane(text),
            weather_intent: fastpath::weather::detect(text).is_some(),
            crypto_intent: fastpath::crypto::detect(&lowered),
            tool_loop_candidate,
            memory_recall_candidate: MEMORY_RECALL_CUES.iter().any(|c| lowered.contains(c)),
            has_url,
            web_search_intent,
            dont_browse,
        }
    }

    /// Whether the tool runtime should be initialized at all for this turn.
    pub fn wants_tools(&self) -> bool {
        self.tool_loop_candidate || self.web_search_intent || self.has_url
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What survives intersecting the turn policy with the tools that actually
/// initialized.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPolicy {
    pub can_run_tool_loop: bool,
    pub can_run_web_search: bool,
    pub can_run_web_fetch: bool,
    pub should_preload_web_search: bool,
    pub should_preload_web_fetch: bool,
    pub should_attempt_memory_recall: bool,
}

impl ExecutionPolicy {
    pub fn intersect(
        policy: &TurnPolicy,
        available_tools: &[String],
        cfg: &ToolLoopConfig,
    ) -> Self {
        let has = |name: &str| available_tools.iter().any(|t| t == name);
        let can_run_web_search = has("web_search");
        let can_run_web_fetch = has("web_fetch");

        Self {
            can_run_tool_loop: cfg.enabled && policy.tool_loop_candidate && !available_tools.is_empty(),
            can_run_web_search,
            can_run_web_fetch,
            should_preload_web_search: can_run_web_search
                && policy.web_search_intent
                && !policy.dont_browse,
            // Preload gates on URL presence alone, intentionally.
            should_preload_web_fetch: can_run_web_fetch && policy.has_url,
            should_attempt_memory_recall: cfg.memory_loop_enabled
                && policy.memory_recall_candidate,
        }
    }
}

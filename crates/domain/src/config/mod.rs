mod devlog;
mod prompt;
mod routing;
mod timeouts;
mod tool_loop;

pub use devlog::*;
pub use prompt::*;
pub use routing::*;
pub use timeouts::*;
pub use tool_loop::*;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub tool_loop: ToolLoopConfig,
    #[serde(default)]
    pub prompt: PromptBudgetConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub devlog: DevLogConfig,
}

impl Config {
    /// Defaults overlaid with any recognized environment variables.
    ///
    /// Every env value is parsed bounded: garbage or out-of-range values are
    /// clamped or ignored, never panicked on.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.timeouts.apply_env();
        config.tool_loop.apply_env();
        config.prompt.apply_env();
        config.routing.apply_env();
        config.devlog.apply_env();
        config
    }
}

// ── env parse helpers (shared by the config submodules) ────────────

/// Parse `name` as u64, clamped to `[min, max]`. Unset or unparsable values
/// return `default`.
pub(crate) fn env_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    match std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

pub(crate) fn env_u32(name: &str, default: u32, min: u32, max: u32) -> u32 {
    match std::env::var(name).ok().and_then(|v| v.trim().parse::<u32>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

pub(crate) fn env_f64(name: &str, default: f64, min: f64, max: f64) -> f64 {
    match std::env::var(name).ok().and_then(|v| v.trim().parse::<f64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Comma-separated list; empty entries are dropped.
pub(crate) fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u64_clamps_and_defaults() {
        std::env::set_var("NOVA_TEST_U64_A", "999999");
        assert_eq!(env_u64("NOVA_TEST_U64_A", 10, 1, 100), 100);
        std::env::set_var("NOVA_TEST_U64_A", "not a number");
        assert_eq!(env_u64("NOVA_TEST_U64_A", 10, 1, 100), 10);
        std::env::remove_var("NOVA_TEST_U64_A");
        assert_eq!(env_u64("NOVA_TEST_U64_A", 10, 1, 100), 10);
    }

    #[test]
    fn env_bool_accepts_common_truthy_forms() {
        for v in ["1", "true", "yes", "on"] {
            std::env::set_var("NOVA_TEST_BOOL", v);
            assert!(env_bool("NOVA_TEST_BOOL", false));
        }
        std::env::set_var("NOVA_TEST_BOOL", "0");
        assert!(!env_bool("NOVA_TEST_BOOL", true));
        std::env::remove_var("NOVA_TEST_BOOL");
        assert!(env_bool("NOVA_TEST_BOOL", true));
    }

    #[test]
    fn env_list_splits_and_trims() {
        std::env::set_var("NOVA_TEST_LIST", "openai, claude,,grok ");
        assert_eq!(
            env_list("NOVA_TEST_LIST").unwrap(),
            vec!["openai", "claude", "grok"]
        );
        std::env::remove_var("NOVA_TEST_LIST");
        assert!(env_list("NOVA_TEST_LIST").is_none());
    }

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(
            back.tool_loop.max_steps,
            config.tool_loop.max_steps
        );
    }
}

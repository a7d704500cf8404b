use serde::{Deserialize, Serialize};

use super::{env_bool, env_f64, env_string, env_u32, env_u64};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dev conversation log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How user/assistant text is written to the dev log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedactMode {
    /// Text written as-is (still truncated to `max_chars`).
    #[default]
    Plain,
    /// Text replaced with `[redacted <n> chars]`.
    Redact,
    /// Text replaced with a salted SHA-256 digest.
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevLogConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub redact_mode: RedactMode,
    /// Per-field character cap before truncation.
    #[serde(default = "d_max_chars")]
    pub max_chars: usize,
    /// Salt mixed into hashes in [`RedactMode::Hash`].
    #[serde(default)]
    pub hash_salt: String,
    /// Aggregate log path; per-user logs live next to it.
    #[serde(default = "d_log_path")]
    pub log_path: String,
    /// Quality scores at or below this are logged at warn level.
    #[serde(default = "d_warn_score")]
    pub warn_score_threshold: f64,
    /// Sliding-window size for guardrail alert rates.
    #[serde(default = "d_alert_window")]
    pub alert_window: usize,
    /// Minimum samples before a rate can fire.
    #[serde(default = "d_alert_min_samples")]
    pub alert_min_samples: usize,
    /// Seconds between alerts for one user scope.
    #[serde(default = "d_alert_cooldown")]
    pub alert_cooldown_secs: u64,
    /// Rate thresholds (0.0–1.0) per guardrail counter. Kept last so the
    /// struct serializes cleanly to TOML (tables after values).
    #[serde(default)]
    pub alert_thresholds: GuardrailAlertThresholds,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GuardrailAlertThresholds {
    #[serde(default = "d_rate_budget")]
    pub budget_exhausted: f64,
    #[serde(default = "d_rate_step")]
    pub step_timeout: f64,
    #[serde(default = "d_rate_tool")]
    pub tool_exec_timeout: f64,
    #[serde(default = "d_rate_cap")]
    pub call_capped: f64,
}

impl Default for GuardrailAlertThresholds {
    fn default() -> Self {
        Self {
            budget_exhausted: d_rate_budget(),
            step_timeout: d_rate_step(),
            tool_exec_timeout: d_rate_tool(),
            call_capped: d_rate_cap(),
        }
    }
}

impl Default for DevLogConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            redact_mode: RedactMode::default(),
            max_chars: d_max_chars(),
            hash_salt: String::new(),
            log_path: d_log_path(),
            warn_score_threshold: d_warn_score(),
            alert_window: d_alert_window(),
            alert_min_samples: d_alert_min_samples(),
            alert_thresholds: GuardrailAlertThresholds::default(),
            alert_cooldown_secs: d_alert_cooldown(),
        }
    }
}

impl DevLogConfig {
    pub(super) fn apply_env(&mut self) {
        self.enabled = env_bool("NOVA_DEVLOG_ENABLED", self.enabled);
        if let Some(mode) = env_string("NOVA_DEVLOG_REDACT_MODE") {
            self.redact_mode = match mode.as_str() {
                "redact" => RedactMode::Redact,
                "hash" => RedactMode::Hash,
                _ => RedactMode::Plain,
            };
        }
        self.max_chars =
            env_u32("NOVA_DEVLOG_MAX_CHARS", self.max_chars as u32, 64, 65_536) as usize;
        if let Some(salt) = env_string("NOVA_DEVLOG_HASH_SALT") {
            self.hash_salt = salt;
        }
        if let Some(path) = env_string("NOVA_DEVLOG_PATH") {
            self.log_path = path;
        }
        self.warn_score_threshold = env_f64(
            "NOVA_DEVLOG_WARN_SCORE",
            self.warn_score_threshold,
            0.0,
            1.0,
        );
        self.alert_window =
            env_u32("NOVA_GUARDRAIL_ALERT_WINDOW", self.alert_window as u32, 4, 1_024) as usize;
        self.alert_min_samples = env_u32(
            "NOVA_GUARDRAIL_ALERT_MIN_SAMPLES",
            self.alert_min_samples as u32,
            1,
            1_024,
        ) as usize;
        self.alert_cooldown_secs = env_u64(
            "NOVA_GUARDRAIL_ALERT_COOLDOWN_SECS",
            self.alert_cooldown_secs,
            1,
            86_400,
        );
    }
}

fn d_true() -> bool {
    true
}
fn d_max_chars() -> usize {
    4_000
}
fn d_log_path() -> String {
    "./data/devlog/conversations.jsonl".into()
}
fn d_warn_score() -> f64 {
    0.4
}
fn d_alert_window() -> usize {
    50
}
fn d_alert_min_samples() -> usize {
    10
}
fn d_alert_cooldown() -> u64 {
    300
}
fn d_rate_budget() -> f64 {
    0.2
}
fn d_rate_step() -> f64 {
    0.3
}
fn d_rate_tool() -> f64 {
    0.3
}
fn d_rate_cap() -> f64 {
    0.5
}

use serde::{Deserialize, Serialize};

use super::env_u64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every outbound call the engine makes is wrapped in one of these bounds.
/// All values are milliseconds and env-adjustable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Total wall-clock budget for one tool loop.
    #[serde(default = "d_tool_loop_max_duration")]
    pub tool_loop_max_duration_ms: u64,
    /// Per-step model request timeout inside the tool loop.
    #[serde(default = "d_tool_loop_request")]
    pub tool_loop_request_timeout_ms: u64,
    /// Per-tool execution timeout inside a step.
    #[serde(default = "d_tool_loop_tool_exec")]
    pub tool_loop_tool_exec_timeout_ms: u64,
    /// Budget for the no-tools recovery completion after an empty loop.
    #[serde(default = "d_tool_loop_recovery")]
    pub tool_loop_recovery_timeout_ms: u64,
    /// Direct (non-loop) provider request timeout.
    #[serde(default = "d_request")]
    pub request_timeout_ms: u64,
    /// Memory recall enrichment task.
    #[serde(default = "d_memory_recall")]
    pub memory_recall_timeout_ms: u64,
    /// Web-search preload enrichment task.
    #[serde(default = "d_web_preload")]
    pub web_preload_timeout_ms: u64,
    /// Link-understanding enrichment task.
    #[serde(default = "d_link_preload")]
    pub link_preload_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tool_loop_max_duration_ms: d_tool_loop_max_duration(),
            tool_loop_request_timeout_ms: d_tool_loop_request(),
            tool_loop_tool_exec_timeout_ms: d_tool_loop_tool_exec(),
            tool_loop_recovery_timeout_ms: d_tool_loop_recovery(),
            request_timeout_ms: d_request(),
            memory_recall_timeout_ms: d_memory_recall(),
            web_preload_timeout_ms: d_web_preload(),
            link_preload_timeout_ms: d_link_preload(),
        }
    }
}

impl TimeoutConfig {
    pub(super) fn apply_env(&mut self) {
        self.tool_loop_max_duration_ms = env_u64(
            "TOOL_LOOP_MAX_DURATION_MS",
            self.tool_loop_max_duration_ms,
            5_000,
            600_000,
        );
        self.tool_loop_request_timeout_ms = env_u64(
            "TOOL_LOOP_REQUEST_TIMEOUT_MS",
            self.tool_loop_request_timeout_ms,
            1_000,
            120_000,
        );
        self.tool_loop_tool_exec_timeout_ms = env_u64(
            "TOOL_LOOP_TOOL_EXEC_TIMEOUT_MS",
            self.tool_loop_tool_exec_timeout_ms,
            500,
            120_000,
        );
        self.tool_loop_recovery_timeout_ms = env_u64(
            "TOOL_LOOP_RECOVERY_TIMEOUT_MS",
            self.tool_loop_recovery_timeout_ms,
            1_000,
            60_000,
        );
        self.request_timeout_ms = env_u64(
            "OPENAI_REQUEST_TIMEOUT_MS",
            self.request_timeout_ms,
            1_000,
            180_000,
        );
        self.memory_recall_timeout_ms = env_u64(
            "MEMORY_RECALL_TIMEOUT_MS",
            self.memory_recall_timeout_ms,
            100,
            30_000,
        );
        self.web_preload_timeout_ms = env_u64(
            "WEB_PRELOAD_TIMEOUT_MS",
            self.web_preload_timeout_ms,
            250,
            30_000,
        );
        self.link_preload_timeout_ms = env_u64(
            "LINK_PRELOAD_TIMEOUT_MS",
            self.link_preload_timeout_ms,
            250,
            30_000,
        );
    }
}

fn d_tool_loop_max_duration() -> u64 {
    45_000
}
fn d_tool_loop_request() -> u64 {
    20_000
}
fn d_tool_loop_tool_exec() -> u64 {
    12_000
}
fn d_tool_loop_recovery() -> u64 {
    8_000
}
fn d_request() -> u64 {
    30_000
}
fn d_memory_recall() -> u64 {
    2_500
}
fn d_web_preload() -> u64 {
    3_500
}
fn d_link_preload() -> u64 {
    4_000
}

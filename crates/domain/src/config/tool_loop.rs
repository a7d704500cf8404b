use serde::{Deserialize, Serialize};

use super::{env_bool, env_u32};

/// Tool-loop shape limits (the time limits live in [`super::TimeoutConfig`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLoopConfig {
    #[serde(default = "d_enabled")]
    pub enabled: bool,
    /// Maximum model↔tool iterations per turn.
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    /// Maximum tool calls executed per step; overflow is truncated and the
    /// model is told via a guardrail-note tool result.
    #[serde(default = "d_max_tool_calls_per_step")]
    pub max_tool_calls_per_step: u32,
    /// When false, memory recall enrichment is skipped entirely.
    #[serde(default = "d_enabled")]
    pub memory_loop_enabled: bool,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            enabled: d_enabled(),
            max_steps: d_max_steps(),
            max_tool_calls_per_step: d_max_tool_calls_per_step(),
            memory_loop_enabled: d_enabled(),
        }
    }
}

impl ToolLoopConfig {
    pub(super) fn apply_env(&mut self) {
        self.enabled = env_bool("TOOL_LOOP_ENABLED", self.enabled);
        self.max_steps = env_u32("TOOL_LOOP_MAX_STEPS", self.max_steps, 1, 32);
        self.max_tool_calls_per_step = env_u32(
            "TOOL_LOOP_MAX_TOOL_CALLS_PER_STEP",
            self.max_tool_calls_per_step,
            1,
            16,
        );
        self.memory_loop_enabled = env_bool("MEMORY_LOOP_ENABLED", self.memory_loop_enabled);
    }
}

fn d_enabled() -> bool {
    true
}
fn d_max_steps() -> u32 {
    8
}
fn d_max_tool_calls_per_step() -> u32 {
    4
}

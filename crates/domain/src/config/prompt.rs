use serde::{Deserialize, Serialize};

use super::env_u32;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt token budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token caps for prompt assembly and completion sizing. All env-adjustable
/// and clamped on parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBudgetConfig {
    /// Hard ceiling: assembled prompt + user message + response reserve must
    /// stay under this.
    #[serde(default = "d_max_prompt_tokens")]
    pub max_prompt_tokens: u32,
    /// Tokens held back for the model's reply.
    #[serde(default = "d_response_reserve")]
    pub response_reserve_tokens: u32,
    /// Preferred history size when the budget allows it.
    #[serde(default = "d_history_target")]
    pub history_target_tokens: u32,
    #[serde(default = "d_min_history")]
    pub min_history_tokens: u32,
    #[serde(default = "d_max_history")]
    pub max_history_tokens: u32,
    /// Per-section cap for appended context sections.
    #[serde(default = "d_section_max")]
    pub context_section_max_tokens: u32,
    /// Claude non-loop completion cap.
    #[serde(default = "d_claude_chat_max")]
    pub claude_chat_max_tokens: u32,
    /// OpenAI-compatible tool-loop completion cap.
    #[serde(default = "d_tool_loop_completion_max")]
    pub openai_tool_loop_max_completion_tokens: u32,
    /// Completion cap on the fast-lane greeting path.
    #[serde(default = "d_fast_lane_completion_max")]
    pub fast_lane_max_completion_tokens: u32,
    /// Completion cap ceiling under strict output constraints.
    #[serde(default = "d_strict_completion_max")]
    pub strict_max_completion_tokens: u32,
}

impl Default for PromptBudgetConfig {
    fn default() -> Self {
        Self {
            max_prompt_tokens: d_max_prompt_tokens(),
            response_reserve_tokens: d_response_reserve(),
            history_target_tokens: d_history_target(),
            min_history_tokens: d_min_history(),
            max_history_tokens: d_max_history(),
            context_section_max_tokens: d_section_max(),
            claude_chat_max_tokens: d_claude_chat_max(),
            openai_tool_loop_max_completion_tokens: d_tool_loop_completion_max(),
            fast_lane_max_completion_tokens: d_fast_lane_completion_max(),
            strict_max_completion_tokens: d_strict_completion_max(),
        }
    }
}

impl PromptBudgetConfig {
    pub(super) fn apply_env(&mut self) {
        self.max_prompt_tokens =
            env_u32("MAX_PROMPT_TOKENS", self.max_prompt_tokens, 1_000, 200_000);
        self.response_reserve_tokens = env_u32(
            "PROMPT_RESPONSE_RESERVE_TOKENS",
            self.response_reserve_tokens,
            64,
            16_000,
        );
        self.history_target_tokens = env_u32(
            "PROMPT_HISTORY_TARGET_TOKENS",
            self.history_target_tokens,
            128,
            64_000,
        );
        self.min_history_tokens = env_u32(
            "PROMPT_MIN_HISTORY_TOKENS",
            self.min_history_tokens,
            0,
            16_000,
        );
        self.max_history_tokens = env_u32(
            "PROMPT_MAX_HISTORY_TOKENS",
            self.max_history_tokens,
            256,
            128_000,
        );
        self.context_section_max_tokens = env_u32(
            "PROMPT_CONTEXT_SECTION_MAX_TOKENS",
            self.context_section_max_tokens,
            64,
            16_000,
        );
        self.claude_chat_max_tokens = env_u32(
            "CLAUDE_CHAT_MAX_TOKENS",
            self.claude_chat_max_tokens,
            128,
            32_000,
        );
        self.openai_tool_loop_max_completion_tokens = env_u32(
            "OPENAI_TOOL_LOOP_MAX_COMPLETION_TOKENS",
            self.openai_tool_loop_max_completion_tokens,
            128,
            32_000,
        );
        self.fast_lane_max_completion_tokens = env_u32(
            "FAST_LANE_MAX_COMPLETION_TOKENS",
            self.fast_lane_max_completion_tokens,
            32,
            4_000,
        );
        self.strict_max_completion_tokens = env_u32(
            "STRICT_MAX_COMPLETION_TOKENS",
            self.strict_max_completion_tokens,
            64,
            8_000,
        );
    }
}

fn d_max_prompt_tokens() -> u32 {
    8_000
}
fn d_response_reserve() -> u32 {
    1_024
}
fn d_history_target() -> u32 {
    2_048
}
fn d_min_history() -> u32 {
    512
}
fn d_max_history() -> u32 {
    4_096
}
fn d_section_max() -> u32 {
    900
}
fn d_claude_chat_max() -> u32 {
    2_048
}
fn d_tool_loop_completion_max() -> u32 {
    1_024
}
fn d_fast_lane_completion_max() -> u32 {
    256
}
fn d_strict_completion_max() -> u32 {
    512
}

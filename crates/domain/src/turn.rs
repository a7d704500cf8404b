use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::stream::Usage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One inbound user utterance plus everything the dispatcher needs to route
/// it. Built by the transport boundary; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnInput {
    /// The raw utterance text.
    pub text: String,
    /// Source tag: `hud`, `voice`, `telegram`, `discord`, `novachat`, …
    pub source: String,
    pub sender_id: String,
    pub user_context_id: String,
    pub session_key: String,
    /// When absent, derived from source + sender (see sessions crate).
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub inbound_message_id: Option<String>,
    #[serde(default)]
    pub persona: PersonaOverrides,
    /// Single-use token authorizing sensitive tool actions for this turn.
    #[serde(default)]
    pub hud_op_token: Option<String>,
    /// Per-turn access token for collaborator APIs.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl TurnInput {
    /// Minimal input for tests and internal replays.
    pub fn bare(text: impl Into<String>, session_key: impl Into<String>) -> Self {
        let session_key = session_key.into();
        Self {
            text: text.into(),
            source: "novachat".into(),
            sender_id: "local".into(),
            user_context_id: "default".into(),
            session_key,
            conversation_id: None,
            inbound_message_id: None,
            persona: PersonaOverrides::default(),
            hud_op_token: None,
            access_token: None,
        }
    }
}

/// Runtime persona overrides carried on each turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaOverrides {
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub communication_style: Option<String>,
    #[serde(default)]
    pub assistant_name: Option<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
    #[serde(default)]
    pub proactivity: Option<String>,
    #[serde(default)]
    pub humor: Option<String>,
    #[serde(default)]
    pub risk: Option<String>,
    #[serde(default)]
    pub structure: Option<String>,
    #[serde(default)]
    pub challenge: Option<String>,
}

impl PersonaOverrides {
    pub fn is_empty(&self) -> bool {
        self.tone.is_none()
            && self.communication_style.is_none()
            && self.assistant_name.is_none()
            && self.custom_instructions.is_none()
            && self.proactivity.is_none()
            && self.humor.is_none()
            && self.risk.is_none()
            && self.structure.is_none()
            && self.challenge.is_none()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Route
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Labeled outcome identifying which dispatcher branch or engine sub-path
/// handled a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Shutdown,
    DuplicateSkipped,
    DuplicateCryptoReplay,
    MemoryUpdate,
    SkillPreference,
    MissionContextCancelled,
    MissionContextRefined,
    WeatherConfirmAccepted,
    WeatherConfirmDeclined,
    MissionConfirmAccepted,
    MissionConfirmDeclined,
    MissionConfirmPrompt,
    WorkflowBuild,
    Music,
    FastPathWeather,
    FastPathWeatherConfirmPrompt,
    FastPathCrypto,
    ChatStream,
    ChatDirect,
    ToolLoop,
    ToolLoopRecovery,
    ChatError,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Shutdown => "shutdown",
            Route::DuplicateSkipped => "duplicate_skipped",
            Route::DuplicateCryptoReplay => "duplicate_crypto_replay",
            Route::MemoryUpdate => "memory_update",
            Route::SkillPreference => "skill_preference",
            Route::MissionContextCancelled => "mission_context_cancelled",
            Route::MissionContextRefined => "mission_context_refined",
            Route::WeatherConfirmAccepted => "weather_confirm_accepted",
            Route::WeatherConfirmDeclined => "weather_confirm_declined",
            Route::MissionConfirmAccepted => "mission_confirm_accepted",
            Route::MissionConfirmDeclined => "mission_confirm_declined",
            Route::MissionConfirmPrompt => "mission_confirm_prompt",
            Route::WorkflowBuild => "workflow_build",
            Route::Music => "music",
            Route::FastPathWeather => "fast_path_weather",
            Route::FastPathWeatherConfirmPrompt => "fast_path_weather_confirm_prompt",
            Route::FastPathCrypto => "fast_path_crypto",
            Route::ChatStream => "chat_stream",
            Route::ChatDirect => "chat_direct",
            Route::ToolLoop => "tool_loop",
            Route::ToolLoopRecovery => "tool_loop_recovery",
            Route::ChatError => "chat_error",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One observed tool call inside a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub ok: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One rung of the retry ladder (model switches, recovery completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStep {
    pub stage: String,
    pub from_model: String,
    pub to_model: String,
    pub reason: String,
}

/// Snapshot of the tool-loop guardrail counters for one turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GuardrailSnapshot {
    pub budget_exhausted: bool,
    pub step_timeouts: u32,
    pub tool_execution_timeouts: u32,
    pub calls_capped: u32,
    pub steps_taken: u32,
}

impl GuardrailSnapshot {
    pub fn any_breach(&self) -> bool {
        self.budget_exhausted
            || self.step_timeouts > 0
            || self.tool_execution_timeouts > 0
            || self.calls_capped > 0
    }
}

/// The engine's output for one turn. Created on dispatcher entry, mutated
/// only by the engine and its sub-passes, closed by the dev-log writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub route: Route,
    pub ok: bool,
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub retry_ladder: Vec<RetryStep>,
    /// Stage name → elapsed milliseconds.
    #[serde(default)]
    pub latency_stages: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hot_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Whether any non-empty candidate reply existed before fallback.
    #[serde(default)]
    pub had_candidate_reply: bool,
    #[serde(default)]
    pub guardrails: GuardrailSnapshot,
    #[serde(default)]
    pub memory_recall_used: bool,
    #[serde(default)]
    pub web_context_used: bool,
    #[serde(default)]
    pub link_context_used: bool,
    #[serde(default)]
    pub constraint_correction_passes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ranked provider candidates considered during resolution.
    #[serde(default)]
    pub ranked_candidates: Vec<String>,
}

impl RunSummary {
    /// A summary for a routed (non-engine) outcome with a canned reply.
    pub fn routed(route: Route, reply: impl Into<String>) -> Self {
        Self {
            route,
            ok: true,
            reply: reply.into(),
            provider: None,
            model: None,
            usage: Usage::default(),
            estimated_cost_usd: None,
            tool_calls: Vec::new(),
            retry_ladder: Vec::new(),
            latency_stages: BTreeMap::new(),
            hot_path: None,
            fallback_stage: None,
            fallback_reason: None,
            had_candidate_reply: false,
            guardrails: GuardrailSnapshot::default(),
            memory_recall_used: false,
            web_context_used: false,
            link_context_used: false,
            constraint_correction_passes: 0,
            error: None,
            ranked_candidates: Vec::new(),
        }
    }
}

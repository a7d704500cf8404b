//! Collaborator seams.
//!
//! Everything the engine talks to outside its own process boundary is one of
//! these narrow traits: the WebSocket broadcaster, the tool runtime, the
//! integrations registry, the weather/crypto fast-path services, the
//! workflow (mission) builder, the music handler, and voice. Tests plug in
//! mocks; the host wires real implementations at composition time.

use std::sync::Arc;

use nova_domain::error::Result;
use nova_domain::stream::Usage;
use nova_domain::tool::{ToolCall, ToolDefinition, ToolOutcome};
use nova_providers::IntegrationsSnapshot;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broadcaster
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of consuming a single-use HUD operation token.
#[derive(Debug, Clone)]
pub struct HudTokenOutcome {
    pub ok: bool,
    pub reason: Option<String>,
}

/// Outbound fan-out to connected clients.
///
/// Implementations must not block generation: delta emission is
/// fire-and-forget from the engine's perspective. Within one stream id the
/// engine guarantees `start → delta* → done` ordering and never interleaves
/// two streams on the same id.
#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast_state(&self, state: &str);
    async fn broadcast_thinking_status(&self, status: &str);
    async fn broadcast_message(&self, text: &str);
    async fn stream_start(&self, stream_id: &str);
    async fn stream_delta(&self, stream_id: &str, delta: &str);
    async fn stream_done(&self, stream_id: &str);
    /// Token usage + estimated cost for a finished turn.
    async fn broadcast_usage(&self, usage: &Usage, estimated_cost_usd: Option<f64>);
    /// Consume the turn's single-use HUD token to authorize a sensitive tool
    /// action. A missing or spent token returns `ok: false`.
    async fn consume_hud_op_token(&self, token: Option<&str>, action: &str) -> HudTokenOutcome;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One initialized tool runtime for one user context.
#[async_trait::async_trait]
pub trait ToolSession: Send + Sync {
    fn tools(&self) -> Vec<ToolDefinition>;
    /// Execute one call. Failures come back as error outcomes, not `Err`;
    /// the model is supposed to see them.
    async fn execute(&self, call: &ToolCall) -> ToolOutcome;
}

/// Lazily initialized tool runtime; init is skipped entirely on turns whose
/// policy says tools won't be needed.
#[async_trait::async_trait]
pub trait ToolRuntime: Send + Sync {
    async fn init(&self, user_context_id: &str) -> Result<Arc<dyn ToolSession>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Integrations registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Source of truth for which providers a user has connected. The engine
/// caches snapshots with a TTL and single-flight refresh (see `state`).
#[async_trait::async_trait]
pub trait IntegrationsProvider: Send + Sync {
    async fn snapshot(&self, user_context_id: &str) -> Result<IntegrationsSnapshot>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fast-path services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A rendered weather lookup.
#[derive(Debug, Clone)]
pub struct WeatherReport {
    pub location: String,
    pub summary: String,
}

#[async_trait::async_trait]
pub trait WeatherService: Send + Sync {
    async fn lookup(&self, location: &str) -> Result<WeatherReport>;
}

#[async_trait::async_trait]
pub trait CryptoService: Send + Sync {
    /// Render the portfolio/market report.
    async fn report(&self, user_context_id: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mission builder & music
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait WorkflowBuilder: Send + Sync {
    /// Build a mission/workflow from a natural-language prompt and return
    /// the user-facing confirmation reply.
    async fn build(&self, user_context_id: &str, prompt: &str) -> Result<String>;
}

#[async_trait::async_trait]
pub trait MusicHandler: Send + Sync {
    async fn handle(&self, user_context_id: &str, text: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Voice
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait Voice: Send + Sync {
    async fn speak(&self, text: &str);
    async fn play_thinking(&self);

    /// Map a free-form tone override to a known tone, if any.
    fn normalize_tone(&self, raw: &str) -> Option<String> {
        let tone = raw.trim().to_lowercase();
        match tone.as_str() {
            "warm" | "calm" | "direct" | "playful" | "formal" | "concise" => Some(tone),
            _ => None,
        }
    }

    /// Render the persona directive for a normalized tone.
    fn tone_directive(&self, tone: &str) -> String {
        format!("Adopt a {tone} speaking tone in every reply.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentVoice;

    #[async_trait::async_trait]
    impl Voice for SilentVoice {
        async fn speak(&self, _text: &str) {}
        async fn play_thinking(&self) {}
    }

    #[test]
    fn tone_normalization_defaults() {
        let voice = SilentVoice;
        assert_eq!(voice.normalize_tone(" Warm "), Some("warm".into()));
        assert_eq!(voice.normalize_tone("sarcastic"), None);
        assert!(voice.tone_directive("warm").contains("warm"));
    }
}

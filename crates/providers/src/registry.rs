//! Provider resolution.
//!
//! Turns the integrations snapshot (which backends the user has connected,
//! keyed, and marked active) into one concrete [`ChatRuntime`]: a provider
//! tag, credentials, and a model, plus the ranked candidate list the run
//! summary records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use nova_domain::capability::ProviderKind;
use nova_domain::error::{Error, Result};

use crate::anthropic::AnthropicClient;
use crate::openai_compat::OpenAiCompatClient;
use crate::traits::ProviderClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One provider integration as the integrations registry reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderIntegration {
    pub kind: ProviderKind,
    /// The user finished connecting this provider.
    pub connected: bool,
    /// Not administratively disabled.
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// The user's explicitly selected "active" provider.
    #[serde(default)]
    pub active: bool,
}

fn d_true() -> bool {
    true
}

/// Point-in-time view of every provider integration for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationsSnapshot {
    pub providers: Vec<ProviderIntegration>,
}

/// Inputs to resolution beyond the snapshot itself.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Only rank providers that can drive the tool loop.
    pub require_tools: bool,
    /// Ordered preference list (provider tags).
    pub preferred: Vec<String>,
    /// Honor an `active` marker over preference order.
    pub allow_active_override: bool,
}

/// The resolved backend for one turn.
#[derive(Debug, Clone)]
pub struct ChatRuntime {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    /// Why this provider won (recorded in debug logs and the run summary).
    pub route_reason: String,
    /// Every candidate considered, best first, as `"tag/model"`.
    pub ranked_candidates: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn model_for(integration: &ProviderIntegration) -> String {
    integration
        .default_model
        .clone()
        .unwrap_or_else(|| integration.kind.fallback_model().to_string())
}

fn preference_rank(preferred: &[String], kind: ProviderKind) -> usize {
    preferred
        .iter()
        .position(|p| p == kind.as_str())
        .unwrap_or(preferred.len())
}

/// Resolve the chat runtime for one turn.
///
/// Rules, in order:
/// 1. Exactly one connected-and-keyed provider → use it.
/// 2. When tools are required, only tool-capable providers are ranked.
/// 3. The preferred-providers order ranks the rest; an `active` marker wins
///    when `allow_active_override` is set.
/// 4. The model comes from the integration's configured default, falling
///    back to the per-kind hardcoded model.
///
/// Fails with [`Error::MissingApiKey`] / [`Error::ProviderDisabled`] when the
/// chosen provider is unkeyed or disabled, and [`Error::Config`] when nothing
/// is connected at all.
pub fn resolve_chat_runtime(
    snapshot: &IntegrationsSnapshot,
    opts: &ResolveOptions,
) -> Result<ChatRuntime> {
    let connected: Vec<&ProviderIntegration> =
        snapshot.providers.iter().filter(|p| p.connected).collect();

    if connected.is_empty() {
        return Err(Error::Config("no provider connected".into()));
    }

    // Single connected provider short-circuits ranking entirely.
    if connected.len() == 1 {
        let only = connected[0];
        return finish(only, "single_connected", vec![candidate_label(only)]);
    }

    let mut eligible: Vec<&ProviderIntegration> = connected
        .iter()
        .copied()
        .filter(|p| !opts.require_tools || p.kind.capabilities().supports_tools)
        .collect();

    if eligible.is_empty() {
        return Err(Error::Config(
            "no connected provider supports tool calling".into(),
        ));
    }

    eligible.sort_by_key(|p| preference_rank(&opts.preferred, p.kind));

    let ranked: Vec<String> = eligible.iter().map(|p| candidate_label(p)).collect();

    if opts.allow_active_override {
        if let Some(active) = eligible.iter().find(|p| p.active) {
            return finish(active, "active_override", ranked);
        }
    }

    let chosen = eligible[0];
    finish(chosen, "preference_rank", ranked)
}

fn candidate_label(p: &ProviderIntegration) -> String {
    format!("{}/{}", p.kind.as_str(), model_for(p))
}

fn finish(
    chosen: &ProviderIntegration,
    route_reason: &str,
    ranked_candidates: Vec<String>,
) -> Result<ChatRuntime> {
    if !chosen.enabled {
        return Err(Error::ProviderDisabled(chosen.kind.as_str().into()));
    }
    let api_key = match &chosen.api_key {
        Some(key) if !key.trim().is_empty() => key.clone(),
        _ => return Err(Error::MissingApiKey(chosen.kind.as_str().into())),
    };

    tracing::debug!(
        provider = %chosen.kind,
        reason = route_reason,
        candidates = ranked_candidates.len(),
        "resolved chat runtime"
    );

    Ok(ChatRuntime {
        kind: chosen.kind,
        api_key,
        base_url: chosen.base_url.clone(),
        model: model_for(chosen),
        route_reason: route_reason.to_string(),
        ranked_candidates,
    })
}

/// Instantiate the adapter for a resolved runtime.
pub fn build_client(runtime: &ChatRuntime, request_timeout_ms: u64) -> Result<Arc<dyn ProviderClient>> {
    let client: Arc<dyn ProviderClient> = match runtime.kind {
        ProviderKind::Claude => Arc::new(AnthropicClient::new(
            runtime.api_key.clone(),
            runtime.base_url.clone(),
            request_timeout_ms,
        )?),
        kind => Arc::new(OpenAiCompatClient::new(
            kind,
            runtime.api_key.clone(),
            runtime.base_url.clone(),
            request_timeout_ms,
        )?),
    };
    Ok(client)
}

use serde::{Deserialize, Serialize};

use super::{env_bool, env_list};

/// Provider routing policy (spec: routing preference, allow-active-override,
/// preferred-providers list, provider-fallback enable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Ordered provider preference used when ranking candidates.
    #[serde(default = "d_preferred_providers")]
    pub preferred_providers: Vec<String>,
    /// When true, the user's explicitly "active" provider overrides ranking.
    #[serde(default = "d_true")]
    pub allow_active_override: bool,
    /// When true, a first-step transport failure in the tool loop may switch
    /// to the fallback model once.
    #[serde(default = "d_true")]
    pub provider_fallback_enabled: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            preferred_providers: d_preferred_providers(),
            allow_active_override: d_true(),
            provider_fallback_enabled: d_true(),
        }
    }
}

impl RoutingConfig {
    pub(super) fn apply_env(&mut self) {
        if let Some(list) = env_list("NOVA_PREFERRED_PROVIDERS") {
            self.preferred_providers = list;
        }
        self.allow_active_override =
            env_bool("NOVA_ALLOW_ACTIVE_OVERRIDE", self.allow_active_override);
        self.provider_fallback_enabled =
            env_bool("NOVA_PROVIDER_FALLBACK", self.provider_fallback_enabled);
    }
}

fn d_preferred_providers() -> Vec<String> {
    vec!["openai".into(), "claude".into(), "grok".into(), "gemini".into()]
}
fn d_true() -> bool {
    true
}

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider tags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tagged variant identifying one of the supported chat backends.
///
/// The engine branches on this tag only at provider call sites; everywhere
/// else providers are handled through the uniform adapter surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Openai,
    Claude,
    Grok,
    Gemini,
    OpenaiChatkit,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Grok => "grok",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenaiChatkit => "openai-chatkit",
        }
    }

    /// Hardcoded per-provider fallback model, used when the integrations
    /// snapshot carries no configured default.
    pub fn fallback_model(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "gpt-4o-mini",
            ProviderKind::Claude => "claude-sonnet-4-20250514",
            ProviderKind::Grok => "grok-3-mini",
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::OpenaiChatkit => "gpt-4o-mini",
        }
    }

    /// The advertised capability set for this backend.
    pub fn capabilities(&self) -> ProviderCapabilities {
        match self {
            ProviderKind::Openai => ProviderCapabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_verbosity_tuning: true,
            },
            ProviderKind::Claude => ProviderCapabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_verbosity_tuning: false,
            },
            ProviderKind::Grok => ProviderCapabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_verbosity_tuning: false,
            },
            ProviderKind::Gemini => ProviderCapabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_verbosity_tuning: false,
            },
            // ChatKit sessions are completion-only: no tool loop.
            ProviderKind::OpenaiChatkit => ProviderCapabilities {
                supports_tools: false,
                supports_streaming: true,
                supports_verbosity_tuning: false,
            },
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a provider/model combination can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    /// GPT-5-family verbosity / reasoning-effort request tuning.
    pub supports_verbosity_tuning: bool,
}

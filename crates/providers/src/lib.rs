//! Uniform provider adapter surface over the chat backends.
//!
//! Two wire formats cover all supported tags: the OpenAI chat-completions
//! contract (OpenAI, Grok, Gemini's compatibility endpoint, ChatKit) and the
//! Anthropic Messages API (Claude). The engine talks only to
//! [`ProviderClient`] and resolves which backend handles a turn through
//! [`registry::resolve_chat_runtime`].

pub mod anthropic;
pub mod openai_compat;
pub mod registry;
pub mod traits;
pub(crate) mod sse;
pub mod util;

// Re-exports for convenience.
pub use registry::{resolve_chat_runtime, ChatRuntime, IntegrationsSnapshot, ProviderIntegration};
pub use traits::{drain_stream, ChatRequest, ChatResponse, ProviderClient, StreamedReply};
pub use util::{estimate_cost, with_timeout};

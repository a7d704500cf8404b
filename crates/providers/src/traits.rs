use futures_core::Stream;

use nova_domain::capability::{ProviderCapabilities, ProviderKind};
use nova_domain::error::Result;
use nova_domain::stream::{BoxStream, StreamEvent, Usage};
use nova_domain::tool::{ChatMessage, ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Model identifier. Chosen by provider resolution, never by adapters.
    pub model: String,
    /// Conversation messages; system turns are carried inline and split out
    /// by adapters that need a separate system field.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Completion-token cap. `None` lets the provider choose.
    pub max_completion_tokens: Option<u32>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Request strict-JSON output where the backend supports it.
    pub json_mode: bool,
    /// GPT-5-family verbosity tuning (`"low"`, `"medium"`, `"high"`).
    pub verbosity: Option<String>,
    /// GPT-5-family reasoning-effort tuning.
    pub reasoning_effort: Option<String>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
    /// `"stop"`, `"length"`, `"tool_calls"`, `"content_filter"`, …
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// True when the model returned neither text nor tool calls.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// Aggregated result of consuming one provider stream.
#[derive(Debug, Clone, Default)]
pub struct StreamedReply {
    pub reply: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every chat backend adapter implements.
///
/// Adapters translate between the internal types and the wire format of one
/// HTTP API. They never pick models or retry; the engine owns both.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    /// One non-streaming completion.
    async fn create(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// One streaming completion as a stream of provider-agnostic events.
    async fn stream(&self, req: &ChatRequest)
        -> Result<BoxStream<'static, Result<StreamEvent>>>;

    fn capabilities(&self) -> ProviderCapabilities;

    fn kind(&self) -> ProviderKind;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream consumption
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain a provider stream, invoking `on_delta` for every text token, and
/// return the aggregated reply.
///
/// Tool calls are assembled from started/delta/finished events; providers
/// that never emit `ToolCallFinished` get their buffered arguments parsed at
/// end-of-stream (empty or invalid argument JSON becomes `{}`).
pub async fn drain_stream<S, F>(mut stream: S, mut on_delta: F) -> Result<StreamedReply>
where
    S: Stream<Item = Result<StreamEvent>> + Unpin,
    F: FnMut(&str),
{
    use futures_util::StreamExt;

    let mut out = StreamedReply::default();
    // call_id → (tool_name, buffered argument json)
    let mut pending: Vec<(String, String, String)> = Vec::new();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Token { text } => {
                on_delta(&text);
                out.reply.push_str(&text);
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                pending.push((call_id, tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some(entry) = pending.iter_mut().find(|(id, _, _)| *id == call_id) {
                    entry.2.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                pending.retain(|(id, _, _)| *id != call_id);
                out.tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            StreamEvent::Done {
                usage,
                finish_reason,
            } => {
                if usage.is_some() {
                    out.usage = usage;
                }
                if finish_reason.is_some() {
                    out.finish_reason = finish_reason;
                }
            }
            StreamEvent::Error { message } => {
                return Err(nova_domain::error::Error::Provider {
                    provider: "stream".into(),
                    message,
                });
            }
        }
    }

    // Flush tool calls that only came through started/delta.
    for (call_id, tool_name, args) in pending {
        let arguments = if args.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&args).unwrap_or_else(|e| {
                tracing::warn!(
                    call_id = %call_id,
                    tool = %tool_name,
                    error = %e,
                    "tool call arguments are not valid JSON, defaulting to empty object"
                );
                serde_json::Value::Object(Default::default())
            })
        };
        out.tool_calls.push(ToolCall {
            call_id,
            tool_name,
            arguments,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev_stream(events: Vec<Result<StreamEvent>>) -> BoxStream<'static, Result<StreamEvent>> {
        Box::pin(async_stream::stream! {
            for e in events {
                yield e;
            }
        })
    }

    #[tokio::test]
    async fn drain_collects_tokens_and_usage() {
        let stream = ev_stream(vec![
            Ok(StreamEvent::Token { text: "hel".into() }),
            Ok(StreamEvent::Token { text: "lo".into() }),
            Ok(StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 7,
                    completion_tokens: 2,
                    total_tokens: 9,
                }),
                finish_reason: Some("stop".into()),
            }),
        ]);
        let mut deltas = Vec::new();
        let out = drain_stream(stream, |d| deltas.push(d.to_string()))
            .await
            .unwrap();
        assert_eq!(out.reply, "hello");
        assert_eq!(deltas, vec!["hel", "lo"]);
        assert_eq!(out.usage.unwrap().total_tokens, 9);
        assert_eq!(out.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn drain_assembles_unfinished_tool_calls() {
        let stream = ev_stream(vec![
            Ok(StreamEvent::ToolCallStarted {
                call_id: "c1".into(),
                tool_name: "web_search".into(),
            }),
            Ok(StreamEvent::ToolCallDelta {
                call_id: "c1".into(),
                delta: r#"{"query":"#.into(),
            }),
            Ok(StreamEvent::ToolCallDelta {
                call_id: "c1".into(),
                delta: r#""rust"}"#.into(),
            }),
            Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("tool_calls".into()),
            }),
        ]);
        let out = drain_stream(stream, |_| {}).await.unwrap();
        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].tool_name, "web_search");
        assert_eq!(
            out.tool_calls[0].arguments,
            serde_json::json!({"query": "rust"})
        );
    }

    #[tokio::test]
    async fn drain_invalid_tool_args_become_empty_object() {
        let stream = ev_stream(vec![
            Ok(StreamEvent::ToolCallStarted {
                call_id: "c1".into(),
                tool_name: "t".into(),
            }),
            Ok(StreamEvent::ToolCallDelta {
                call_id: "c1".into(),
                delta: "not json".into(),
            }),
            Ok(StreamEvent::Done {
                usage: None,
                finish_reason: None,
            }),
        ]);
        let out = drain_stream(stream, |_| {}).await.unwrap();
        assert_eq!(out.tool_calls[0].arguments, serde_json::json!({}));
    }

    #[tokio::test]
    async fn drain_surfaces_stream_error() {
        let stream = ev_stream(vec![Ok(StreamEvent::Error {
            message: "boom".into(),
        })]);
        let err = drain_stream(stream, |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn empty_response_detection() {
        let resp = ChatResponse {
            content: "  ".into(),
            tool_calls: vec![],
            usage: None,
            model: "m".into(),
            finish_reason: None,
        };
        assert!(resp.is_empty());
    }
}

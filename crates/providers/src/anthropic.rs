//! Anthropic-native adapter (Claude).
//!
//! Implements the Messages API: system text travels in a top-level `system`
//! field, tool results are user messages with `tool_result` blocks, and
//! `max_tokens` is mandatory. Stop reasons are normalized to the
//! chat-completions vocabulary so the engine sees one set of finish reasons.

use serde_json::Value;

use nova_domain::capability::{ProviderCapabilities, ProviderKind};
use nova_domain::error::{Error, Result};
use nova_domain::stream::{BoxStream, StreamEvent, Usage};
use nova_domain::tool::{ChatMessage, ContentBlock, MessageContent, Role, ToolCall, ToolDefinition};

use crate::traits::{ChatRequest, ChatResponse, ProviderClient};
use crate::util::{error_detail, from_reqwest};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>, request_timeout_ms: u64) -> Result<Self> {
        let base_url = base_url
            .unwrap_or_else(|| "https://api.anthropic.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url,
            api_key,
            capabilities: ProviderKind::Claude.capabilities(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.joined_text()),
                Role::User => api_messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content.joined_text(),
                })),
                Role::Assistant => api_messages.push(assistant_to_wire(msg)),
                // Tool results are user messages with tool_result blocks.
                Role::Tool => api_messages.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": api_messages,
            "max_tokens": req.max_completion_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t: &ToolDefinition| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

fn assistant_to_wire(msg: &ChatMessage) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => {
                    Some(serde_json::json!({"type": "text", "text": text}))
                }
                ContentBlock::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                })),
                ContentBlock::ToolResult { .. } => None,
            })
            .collect(),
    };
    serde_json::json!({"role": "assistant", "content": content})
}

fn tool_result_to_wire(msg: &ChatMessage) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
    };
    serde_json::json!({"role": "user", "content": content})
}

/// Map Anthropic stop reasons onto the chat-completions vocabulary.
fn normalize_stop_reason(reason: &str) -> &'static str {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        "refusal" => "content_filter",
        _ => "stop",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens").and_then(|t| t.as_u64()).unwrap_or(0) as u32;
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

fn parse_message(body: &Value) -> Result<ChatResponse> {
    let content = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::Provider {
            provider: "claude".into(),
            message: "no content array in response".into(),
        })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    call_id: block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    tool_name: block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            _ => {}
        }
    }

    Ok(ChatResponse {
        content: text,
        tool_calls,
        usage: body.get("usage").and_then(parse_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(|r| normalize_stop_reason(r).to_string()),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembly state for one Anthropic event stream.
///
/// Tool-call arguments arrive as `input_json_delta` fragments against a
/// content-block index; usage arrives split between `message_start`
/// (input tokens) and `message_delta` (output tokens).
#[derive(Default)]
struct StreamState {
    /// content-block index → (call_id, tool_name, buffered json)
    open_blocks: Vec<(usize, String, String, String)>,
    input_tokens: u32,
    finish_reason: Option<String>,
}

fn parse_stream_payload(state: &mut StreamState, data: &str) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    match v.get("type").and_then(|t| t.as_str()) {
        Some("message_start") => {
            if let Some(usage) = v
                .get("message")
                .and_then(|m| m.get("usage"))
                .and_then(parse_usage)
            {
                state.input_tokens = usage.prompt_tokens;
            }
            Vec::new()
        }
        Some("content_block_start") => {
            let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let block = v.get("content_block").unwrap_or(&Value::Null);
            if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                let call_id = block
                    .get("id")
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string();
                let tool_name = block
                    .get("name")
                    .and_then(|x| x.as_str())
                    .unwrap_or_default()
                    .to_string();
                state
                    .open_blocks
                    .push((index, call_id.clone(), tool_name.clone(), String::new()));
                return vec![Ok(StreamEvent::ToolCallStarted { call_id, tool_name })];
            }
            Vec::new()
        }
        Some("content_block_delta") => {
            let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let delta = v.get("delta").unwrap_or(&Value::Null);
            match delta.get("type").and_then(|t| t.as_str()) {
                Some("text_delta") => {
                    let text = delta
                        .get("text")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default();
                    if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![Ok(StreamEvent::Token {
                            text: text.to_string(),
                        })]
                    }
                }
                Some("input_json_delta") => {
                    let fragment = delta
                        .get("partial_json")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default();
                    if let Some(entry) =
                        state.open_blocks.iter_mut().find(|(i, ..)| *i == index)
                    {
                        entry.3.push_str(fragment);
                        return vec![Ok(StreamEvent::ToolCallDelta {
                            call_id: entry.1.clone(),
                            delta: fragment.to_string(),
                        })];
                    }
                    Vec::new()
                }
                _ => Vec::new(),
            }
        }
        Some("content_block_stop") => {
            let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            if let Some(pos) = state.open_blocks.iter().position(|(i, ..)| *i == index) {
                let (_, call_id, tool_name, buffered) = state.open_blocks.remove(pos);
                let arguments = if buffered.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&buffered)
                        .unwrap_or(Value::Object(Default::default()))
                };
                return vec![Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                })];
            }
            Vec::new()
        }
        Some("message_delta") => {
            if let Some(reason) = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|r| r.as_str())
            {
                state.finish_reason = Some(normalize_stop_reason(reason).to_string());
            }
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|t| t.as_u64())
            {
                // Emitted with message_stop below.
                let input = state.input_tokens;
                let usage = Usage {
                    prompt_tokens: input,
                    completion_tokens: output as u32,
                    total_tokens: input + output as u32,
                };
                return vec![Ok(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: state.finish_reason.clone(),
                })];
            }
            Vec::new()
        }
        Some("error") => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown stream error")
                .to_string();
            vec![Ok(StreamEvent::Error { message })]
        }
        // message_stop / ping carry nothing we need.
        _ => Vec::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderClient for AnthropicClient {
    async fn create(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req, false);

        tracing::debug!(model = %req.model, "anthropic messages request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Provider {
                provider: "claude".into(),
                message: error_detail(status.as_u16(), &text),
            });
        }

        parse_message(&serde_json::from_str(&text)?)
    }

    async fn stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req, true);

        tracing::debug!(model = %req.model, "anthropic stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: "claude".into(),
                message: error_detail(status.as_u16(), &text),
            });
        }

        let mut state = StreamState::default();
        Ok(crate::sse::event_stream(resp, move |payload| {
            parse_stream_payload(&mut state, payload)
        }))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_domain::tool::ToolOutcome;

    fn client() -> AnthropicClient {
        AnthropicClient::new("sk-ant-test".into(), None, 1_000).unwrap()
    }

    #[test]
    fn system_turns_move_to_top_level_field() {
        let req = ChatRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![
                ChatMessage::system("persona"),
                ChatMessage::system("constraints"),
                ChatMessage::user("hi"),
            ],
            ..Default::default()
        };
        let body = client().build_body(&req, false);
        assert_eq!(body["system"], "persona\n\nconstraints");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_results_become_user_messages() {
        let req = ChatRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![ChatMessage::tool_result("c1", &ToolOutcome::ok("42"))],
            ..Default::default()
        };
        let body = client().build_body(&req, false);
        let msg = &body["messages"][0];
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "tool_result");
        assert_eq!(msg["content"][0]["tool_use_id"], "c1");
    }

    #[test]
    fn tools_use_input_schema_key() {
        let req = ChatRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![ToolDefinition {
                name: "weather".into(),
                description: "look up weather".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            ..Default::default()
        };
        let body = client().build_body(&req, false);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn stop_reasons_are_normalized() {
        assert_eq!(normalize_stop_reason("end_turn"), "stop");
        assert_eq!(normalize_stop_reason("tool_use"), "tool_calls");
        assert_eq!(normalize_stop_reason("max_tokens"), "length");
        assert_eq!(normalize_stop_reason("refusal"), "content_filter");
    }

    #[test]
    fn parse_message_mixed_content() {
        let body = serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "checking "},
                {"type": "tool_use", "id": "tu_1", "name": "weather", "input": {"city": "pgh"}}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 6}
        });
        let resp = parse_message(&body).unwrap();
        assert_eq!(resp.content, "checking ");
        assert_eq!(resp.tool_calls[0].tool_name, "weather");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.usage.unwrap().total_tokens, 18);
    }

    #[test]
    fn stream_assembles_tool_call_across_deltas() {
        let mut state = StreamState::default();

        parse_stream_payload(
            &mut state,
            r#"{"type":"message_start","message":{"usage":{"input_tokens":9}}}"#,
        );
        let started = parse_stream_payload(
            &mut state,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"tu_1","name":"weather"}}"#,
        );
        assert!(matches!(
            started[0].as_ref().unwrap(),
            StreamEvent::ToolCallStarted { tool_name, .. } if tool_name == "weather"
        ));

        parse_stream_payload(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}"#,
        );
        parse_stream_payload(
            &mut state,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"pgh\"}"}}"#,
        );
        let finished = parse_stream_payload(&mut state, r#"{"type":"content_block_stop","index":0}"#);
        match finished[0].as_ref().unwrap() {
            StreamEvent::ToolCallFinished {
                call_id, arguments, ..
            } => {
                assert_eq!(call_id, "tu_1");
                assert_eq!(arguments["city"], "pgh");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let done = parse_stream_payload(
            &mut state,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":5}}"#,
        );
        match done[0].as_ref().unwrap() {
            StreamEvent::Done {
                usage,
                finish_reason,
            } => {
                assert_eq!(usage.unwrap().total_tokens, 14);
                assert_eq!(finish_reason.as_deref(), Some("tool_calls"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn stream_error_event_surfaces_message() {
        let mut state = StreamState::default();
        let events = parse_stream_payload(
            &mut state,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"overloaded"}}"#,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Error { message } if message == "overloaded"
        ));
    }
}

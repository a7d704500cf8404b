//! OpenAI-compatible adapter.
//!
//! Covers every backend speaking the chat-completions contract: OpenAI
//! itself, Grok (`api.x.ai`), Gemini's OpenAI-compatibility endpoint, and
//! ChatKit sessions. The tag decides the default base URL; the wire format
//! is identical.

use std::collections::HashMap;

use serde_json::Value;

use nova_domain::capability::{ProviderCapabilities, ProviderKind};
use nova_domain::error::{Error, Result};
use nova_domain::stream::{BoxStream, StreamEvent, Usage};
use nova_domain::tool::{
    ChatMessage, ContentBlock, MessageContent, Role, ToolCall, ToolDefinition,
};

use crate::traits::{ChatRequest, ChatResponse, ProviderClient};
use crate::util::{error_detail, from_reqwest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Default chat-completions base URL for an OpenAI-compatible tag.
    pub fn default_base_url(kind: ProviderKind) -> &'static str {
        match kind {
            ProviderKind::Grok => "https://api.x.ai/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            _ => "https://api.openai.com/v1",
        }
    }

    pub fn new(
        kind: ProviderKind,
        api_key: String,
        base_url: Option<String>,
        request_timeout_ms: u64,
    ) -> Result<Self> {
        let base_url = base_url
            .unwrap_or_else(|| Self::default_base_url(kind).to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            kind,
            base_url,
            api_key,
            capabilities: kind.capabilities(),
            client,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_completion_tokens {
            body["max_completion_tokens"] = serde_json::json!(max);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        // GPT-5-family request tuning; other model families reject the keys.
        if self.capabilities.supports_verbosity_tuning && req.model.starts_with("gpt-5") {
            if let Some(ref verbosity) = req.verbosity {
                body["verbosity"] = Value::String(verbosity.clone());
            }
            if let Some(ref effort) = req.reasoning_effort {
                body["reasoning_effort"] = Value::String(effort.clone());
            }
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::Assistant => assistant_to_wire(msg),
        Role::Tool => tool_result_to_wire(msg),
        _ => serde_json::json!({
            "role": role_str(msg.role),
            "content": msg.content.joined_text(),
        }),
    }
}

fn assistant_to_wire(msg: &ChatMessage) -> Value {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    if let MessageContent::Blocks(blocks) = &msg.content {
        for block in blocks {
            match block {
                ContentBlock::Text { text } => text_parts.push(text),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": input.to_string(),
                        }
                    }));
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }
    } else if let MessageContent::Text(t) = &msg.content {
        text_parts.push(t);
    }

    let mut obj = serde_json::json!({"role": "assistant"});
    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &ChatMessage) -> Value {
    if let MessageContent::Blocks(blocks) = &msg.content {
        for block in blocks {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.joined_text(),
    })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            let arguments =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_completion(kind: ProviderKind, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: kind.as_str().into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: kind.as_str().into(),
        message: "no message in choice".into(),
    })?;

    Ok(ChatResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tool_calls: parse_tool_calls(message),
        usage: body.get("usage").and_then(parse_usage),
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream tool-call assembly state: the wire keys deltas by choice
/// index, while our events key by call id.
#[derive(Default)]
struct ToolCallIndex {
    by_index: HashMap<u64, String>,
}

fn parse_stream_payload(state: &mut ToolCallIndex, data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage) arrives last.
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            return vec![Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            })];
        }
        return Vec::new();
    };

    let mut events: Vec<Result<StreamEvent>> = Vec::new();
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                state.by_index.insert(index, id.to_string());
                events.push(Ok(StreamEvent::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                if !args.is_empty() {
                    let call_id = state
                        .by_index
                        .get(&index)
                        .cloned()
                        .unwrap_or_else(|| index.to_string());
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        call_id,
                        delta: args.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        events.push(Ok(StreamEvent::Done {
            usage: v.get("usage").and_then(parse_usage),
            finish_reason: Some(fr.to_string()),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderClient for OpenAiCompatClient {
    async fn create(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = self.chat_url();
        let body = self.build_body(req, false);

        tracing::debug!(provider = %self.kind, model = %req.model, "chat completion request");

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
                provider: self.kind.as_str().into(),
                message: error_detail(status.as_u16(), &text),
            });
        }

        parse_completion(self.kind, &serde_json::from_str(&text)?)
    }

    async fn stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.chat_url();
        let body = self.build_body(req, true);

        tracing::debug!(provider = %self.kind, model = %req.model, "chat stream request");

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
                provider: self.kind.as_str().into(),
                message: error_detail(status.as_u16(), &text),
            });
        }

        let mut state = ToolCallIndex::default();
        Ok(crate::sse::event_stream(resp, move |payload| {
            parse_stream_payload(&mut state, payload)
        }))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiCompatClient {
        OpenAiCompatClient::new(ProviderKind::Openai, "sk-test".into(), None, 1_000).unwrap()
    }

    #[test]
    fn body_carries_model_and_json_mode() {
        let req = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::user("hi")],
            json_mode: true,
            max_completion_tokens: Some(256),
            ..Default::default()
        };
        let body = client().build_body(&req, false);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_completion_tokens"], 256);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn verbosity_only_applies_to_gpt5_models() {
        let mut req = ChatRequest {
            model: "gpt-4o".into(),
            verbosity: Some("low".into()),
            reasoning_effort: Some("minimal".into()),
            ..Default::default()
        };
        let body = client().build_body(&req, false);
        assert!(body.get("verbosity").is_none());

        req.model = "gpt-5-mini".into();
        let body = client().build_body(&req, false);
        assert_eq!(body["verbosity"], "low");
        assert_eq!(body["reasoning_effort"], "minimal");
    }

    #[test]
    fn streaming_body_requests_usage() {
        let req = ChatRequest {
            model: "gpt-4o-mini".into(),
            ..Default::default()
        };
        let body = client().build_body(&req, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn assistant_tool_uses_serialize_as_tool_calls() {
        let msg = ChatMessage::assistant_with_tool_uses(
            "checking",
            &[ToolCall {
                call_id: "c1".into(),
                tool_name: "web_search".into(),
                arguments: serde_json::json!({"query": "x"}),
            }],
        );
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["content"], "checking");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "web_search");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"x"}"#
        );
    }

    #[test]
    fn parse_completion_extracts_tool_calls() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "weather", "arguments": "{\"city\":\"pgh\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
        });
        let resp = parse_completion(ProviderKind::Openai, &body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["city"], "pgh");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.usage.unwrap().total_tokens, 8);
    }

    #[test]
    fn stream_payload_maps_index_to_call_id() {
        let mut state = ToolCallIndex::default();
        let started = parse_stream_payload(
            &mut state,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"t","arguments":""}}]}}]}"#,
        );
        assert!(matches!(
            started[0].as_ref().unwrap(),
            StreamEvent::ToolCallStarted { call_id, .. } if call_id == "call_9"
        ));

        let delta = parse_stream_payload(
            &mut state,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{}"}}]}}]}"#,
        );
        assert!(matches!(
            delta[0].as_ref().unwrap(),
            StreamEvent::ToolCallDelta { call_id, .. } if call_id == "call_9"
        ));
    }

    #[test]
    fn stream_payload_usage_only_chunk() {
        let mut state = ToolCallIndex::default();
        let events = parse_stream_payload(
            &mut state,
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":4,"total_tokens":14}}"#,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { usage: Some(u), .. } if u.total_tokens == 14
        ));
    }

    #[test]
    fn stream_payload_done_sentinel() {
        let mut state = ToolCallIndex::default();
        let events = parse_stream_payload(&mut state, "[DONE]");
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { .. }
        ));
    }
}

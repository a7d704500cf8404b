use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model (provider-agnostic).
/// Each adapter converts the provider wire shape to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Outcome of one tool execution, fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant turn carrying the text (if any) plus the tool-use blocks the
    /// model emitted, in request order.
    pub fn assistant_with_tool_uses(text: &str, calls: &[ToolCall]) -> Self {
        let mut blocks = Vec::new();
        if !text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        for call in calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, outcome: &ToolOutcome) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: call_id.into(),
                content: outcome.content.clone(),
                is_error: outcome.is_error,
            }]),
        }
    }
}

impl MessageContent {
    /// Join all text content into one owned string. Non-text blocks are
    /// skipped.
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_with_tool_uses_orders_text_first() {
        let calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({"query": "rust"}),
        }];
        let msg = ChatMessage::assistant_with_tool_uses("looking that up", &calls);
        match &msg.content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(blocks[0], ContentBlock::Text { .. }));
                assert!(matches!(blocks[1], ContentBlock::ToolUse { .. }));
            }
            _ => panic!("expected Blocks content"),
        }
    }

    #[test]
    fn assistant_with_tool_uses_skips_empty_text() {
        let msg = ChatMessage::assistant_with_tool_uses("", &[]);
        match &msg.content {
            MessageContent::Blocks(blocks) => assert!(blocks.is_empty()),
            _ => panic!("expected Blocks content"),
        }
    }

    #[test]
    fn joined_text_skips_tool_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::ToolUse {
                id: "c".into(),
                name: "t".into(),
                input: serde_json::json!({}),
            },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(content.joined_text(), "a\nb");
    }

    #[test]
    fn tool_result_carries_error_flag() {
        let msg = ChatMessage::tool_result("c9", &ToolOutcome::error("boom"));
        match &msg.content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    assert_eq!(tool_use_id, "c9");
                    assert_eq!(content, "boom");
                    assert!(is_error);
                }
                _ => panic!("expected ToolResult block"),
            },
            _ => panic!("expected Blocks content"),
        }
    }
}

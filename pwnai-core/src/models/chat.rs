// pwnai-core/src/models/chat.rs
use super::tools::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a chat message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One typed fragment of a structured message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// Represents a message in the conversation sent to the model.
///
/// `content` holds plain text; `parts` holds structured fragments. When `content` is
/// empty the effective text is the in-order concatenation of the text parts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parts: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_parts(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            role,
            content: String::new(),
            parts,
        }
    }

    /// Text the provider should see for this message.
    pub fn effective_content(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool-use and tool-result fragments carried by this message.
    pub fn tool_parts(&self) -> impl Iterator<Item = &MessagePart> {
        self.parts
            .iter()
            .filter(|part| !matches!(part, MessagePart::Text { .. }))
    }
}

/// A tool invocation requested by the model.
///
/// `id` is assigned by the provider and must be echoed back with the result.
/// `args` is the JSON text of the tool's input object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: String,
}

/// Everything a backend needs for one completion.
#[derive(Debug, Clone, Default)]
pub struct UseChatRequest {
    pub chat_id: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

/// One event of a streamed completion.
///
/// A stream carries zero or more `Content`/`ToolCall` events followed by exactly one
/// terminal event (`Error` or `Done`).
#[derive(Debug, Clone, PartialEq)]
pub enum UseChatResponse {
    Content(String),
    ToolCall(ToolCall),
    Error(String),
    Done,
}

impl UseChatResponse {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UseChatResponse::Error(_) | UseChatResponse::Done)
    }
}

/// A typed content block of a provider reply.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// A provider's one-shot reply: ordered content blocks and the stop reason.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl ChatResponse {
    /// Whether the provider says it stopped to use tools.
    pub fn has_tool_use(&self) -> bool {
        self.stop_reason.as_deref() == Some("tool_use")
            || self
                .content
                .iter()
                .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }

    /// Tool-use blocks as calls, in reply order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    args: input_to_args(input),
                }),
                _ => None,
            })
            .collect()
    }

    /// All text blocks joined in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn input_to_args(input: &Value) -> String {
    match input {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_effective_content_prefers_content() {
        let mut msg = ChatMessage::user("direct");
        msg.parts.push(MessagePart::Text {
            text: "ignored".into(),
        });
        assert_eq!(msg.effective_content(), "direct");
    }

    #[test]
    fn test_effective_content_joins_text_parts_in_order() {
        let msg = ChatMessage::with_parts(
            Role::User,
            vec![
                MessagePart::Text { text: "scan ".into() },
                MessagePart::ToolResult {
                    tool_use_id: "t1".into(),
                    content: "not text".into(),
                    is_error: false,
                },
                MessagePart::Text {
                    text: "10.0.0.5".into(),
                },
            ],
        );
        assert_eq!(msg.effective_content(), "scan 10.0.0.5");
        assert_eq!(msg.tool_parts().count(), 1);
    }

    #[test]
    fn test_chat_response_parses_blocks() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "term_get_scrollback", "input": {"widget_id": "ab12cd34"}},
                {"type": "thinking", "thinking": "..."},
                {"type": "tool_use", "id": "toolu_2", "name": "pwnai_list_sessions", "input": {}}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();

        assert!(response.has_tool_use());
        assert_eq!(response.text(), "Checking.");
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].args, r#"{"widget_id":"ab12cd34"}"#);
        assert_eq!(calls[1].name, "pwnai_list_sessions");
        assert_eq!(calls[1].args, "{}");
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let value = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(value, json!({"role": "assistant", "content": "hi"}));
    }
}

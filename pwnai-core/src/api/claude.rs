// pwnai-core/src/api/claude.rs
use super::{ChatApiProvider, ChatClient, RetryPolicy, call_chat_completion_api};
use crate::errors::PwnaiError;
use crate::models::chat::{ChatMessage, ChatResponse, MessagePart, Role};
use crate::models::tools::ToolSpec;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClaudeSettings {
    pub api_key: String,
    pub model: String,
    pub endpoint: Option<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClaudeSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ClaudeProvider {
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeProvider {
    pub fn new(api_key: String, endpoint: Option<String>, model: String, max_tokens: u32) -> Self {
        Self {
            api_key,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model,
            max_tokens,
        }
    }
}

/// Converts one message into the provider's content form.
///
/// Plain text stays a string; anything carrying tool parts becomes a block list.
fn message_content(message: &ChatMessage) -> Value {
    if message.tool_parts().next().is_none() {
        return json!(message.effective_content());
    }
    let mut blocks = Vec::new();
    if !message.content.is_empty() {
        blocks.push(json!({"type": "text", "text": message.content}));
    }
    for part in &message.parts {
        match part {
            MessagePart::Text { text } => {
                if message.content.is_empty() && !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text}));
                }
            }
            MessagePart::ToolUse { id, name, input } => {
                blocks.push(json!({"type": "tool_use", "id": id, "name": name, "input": input}));
            }
            MessagePart::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                blocks.push(json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error
                }));
            }
        }
    }
    Value::Array(blocks)
}

fn as_blocks(content: Value) -> Vec<Value> {
    match content {
        Value::Array(blocks) => blocks,
        Value::String(text) if text.is_empty() => Vec::new(),
        Value::String(text) => vec![json!({"type": "text", "text": text})],
        other => vec![other],
    }
}

impl ChatApiProvider for ClaudeProvider {
    fn build_payload(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Value> {
        let mut system_parts = Vec::new();
        let mut wire_messages: Vec<Value> = Vec::new();
        // Tool results are sent as user turns; consecutive ones share one turn.
        let mut previous_was_tool = false;

        for message in messages {
            match message.role {
                Role::System => {
                    let text = message.effective_content();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
                Role::Tool => {
                    let blocks = as_blocks(message_content(message));
                    if previous_was_tool {
                        if let Some(Value::Array(existing)) = wire_messages
                            .last_mut()
                            .and_then(|m| m.get_mut("content"))
                        {
                            existing.extend(blocks);
                            continue;
                        }
                    }
                    wire_messages.push(json!({"role": "user", "content": blocks}));
                    previous_was_tool = true;
                    continue;
                }
                Role::User | Role::Assistant => {
                    let role = if message.role == Role::User { "user" } else { "assistant" };
                    wire_messages.push(json!({"role": role, "content": message_content(message)}));
                }
            }
            previous_was_tool = false;
        }

        let mut payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": wire_messages,
        });
        if !system_parts.is_empty() {
            payload["system"] = json!(system_parts.join("\n\n"));
        }
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.input_schema,
                    })
                })
                .collect();
            payload["tools"] = json!(wire_tools);
        }
        Ok(payload)
    }

    fn parse_response(&self, response_body: &str) -> Result<ChatResponse> {
        serde_json::from_str(response_body).context("Failed to parse Claude API response")
    }

    fn build_headers(&self) -> Result<HashMap<String, String>> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());
        Ok(headers)
    }

    fn get_endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// [`ChatClient`] for Anthropic-compatible messages endpoints.
pub struct ClaudeClient {
    http_client: Client,
    provider: ClaudeProvider,
    retry: RetryPolicy,
}

impl ClaudeClient {
    pub fn new(settings: ClaudeSettings) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            provider: ClaudeProvider::new(
                settings.api_key,
                settings.endpoint,
                settings.model,
                settings.max_tokens,
            ),
            retry: settings.retry,
        })
    }

    pub fn endpoint(&self) -> String {
        self.provider.get_endpoint()
    }
}

#[async_trait]
impl ChatClient for ClaudeClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatResponse, PwnaiError> {
        debug!(model = %self.provider.model, num_messages = messages.len(), "Calling Claude");
        call_chat_completion_api(&self.http_client, &self.provider, messages, tools, &self.retry)
            .await
            .map_err(|e| PwnaiError::provider(format!("{:#}", e)))
    }

    fn model(&self) -> &str {
        &self.provider.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ContentBlock;
    use crate::models::tools::object_schema;
    use httpmock::prelude::*;

    fn fast_settings(endpoint: String) -> ClaudeSettings {
        ClaudeSettings {
            endpoint: Some(endpoint),
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                backoff_factor: 2.0,
            },
            ..ClaudeSettings::new("sk-test")
        }
    }

    fn provider() -> ClaudeProvider {
        ClaudeProvider::new("sk-test".into(), None, DEFAULT_MODEL.into(), 4096)
    }

    #[test]
    fn test_headers_and_endpoint() {
        let p = provider();
        let headers = p.build_headers().unwrap();
        assert_eq!(headers["x-api-key"], "sk-test");
        assert_eq!(headers["anthropic-version"], "2023-06-01");
        assert_eq!(p.get_endpoint(), DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_payload_lifts_system_and_groups_tool_results() {
        let messages = vec![
            ChatMessage::system("You are PwnAI."),
            ChatMessage::user("scan it"),
            ChatMessage::with_parts(
                Role::Assistant,
                vec![
                    MessagePart::Text {
                        text: "Scanning.".into(),
                    },
                    MessagePart::ToolUse {
                        id: "toolu_1".into(),
                        name: "pwnai_scan_target".into(),
                        input: json!({"target": "10.0.0.5"}),
                    },
                    MessagePart::ToolUse {
                        id: "toolu_2".into(),
                        name: "pwnai_list_sessions".into(),
                        input: json!({}),
                    },
                ],
            ),
            ChatMessage::with_parts(
                Role::Tool,
                vec![MessagePart::ToolResult {
                    tool_use_id: "toolu_1".into(),
                    content: "{\"job_id\":1}".into(),
                    is_error: false,
                }],
            ),
            ChatMessage::with_parts(
                Role::Tool,
                vec![MessagePart::ToolResult {
                    tool_use_id: "toolu_2".into(),
                    content: "approval denied: no".into(),
                    is_error: true,
                }],
            ),
        ];
        let tools = vec![ToolSpec {
            name: "pwnai_list_sessions".into(),
            display_name: "List Sessions".into(),
            description: "List sessions".into(),
            log_name: "pwnai:sessions".into(),
            input_schema: object_schema(vec![], &[]),
            strict: false,
        }];

        let payload = provider().build_payload(&messages, &tools).unwrap();
        assert_eq!(payload["system"], "You are PwnAI.");
        assert_eq!(payload["max_tokens"], 4096);
        let wire = payload["messages"].as_array().unwrap();
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0], json!({"role": "user", "content": "scan it"}));
        assert_eq!(wire[1]["content"][0], json!({"type": "text", "text": "Scanning."}));
        assert_eq!(wire[1]["content"][2]["id"], "toolu_2");
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(wire[2]["content"][1]["is_error"], true);
        assert_eq!(payload["tools"][0]["name"], "pwnai_list_sessions");
        assert!(payload["tools"][0].get("log_name").is_none());
    }

    #[tokio::test]
    async fn test_chat_parses_reply() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/messages")
                    .header("x-api-key", "sk-test")
                    .header("anthropic-version", "2023-06-01");
                then.status(200).json_body(json!({
                    "id": "msg_01",
                    "type": "message",
                    "role": "assistant",
                    "content": [
                        {"type": "text", "text": "On it."},
                        {"type": "tool_use", "id": "toolu_9", "name": "read_dir", "input": {"path": "/tmp"}}
                    ],
                    "stop_reason": "tool_use",
                    "usage": {"input_tokens": 10, "output_tokens": 5}
                }));
            })
            .await;

        let client = ClaudeClient::new(fast_settings(server.url("/v1/messages"))).unwrap();
        let reply = client
            .chat(&[ChatMessage::user("list /tmp")], &[])
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(reply.has_tool_use());
        assert_eq!(
            reply.content[1],
            ContentBlock::ToolUse {
                id: "toolu_9".into(),
                name: "read_dir".into(),
                input: json!({"path": "/tmp"})
            }
        );
    }

    #[tokio::test]
    async fn test_chat_non_success_is_provider_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/messages");
                then.status(401).body("{\"error\":\"invalid x-api-key\"}");
            })
            .await;
        let client = ClaudeClient::new(fast_settings(server.url("/v1/messages"))).unwrap();
        let err = client.chat(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        match err {
            PwnaiError::Provider(msg) => {
                assert!(msg.contains("401"), "{}", msg);
                assert!(msg.contains("invalid x-api-key"), "{}", msg);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_retries_server_errors() {
        let server = MockServer::start_async().await;
        let failing = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/messages");
                then.status(529).body("overloaded");
            })
            .await;
        let client = ClaudeClient::new(fast_settings(server.url("/v1/messages"))).unwrap();
        let err = client.chat(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        // One initial attempt plus two retries.
        failing.assert_hits_async(3).await;
        assert!(err.to_string().contains("529"));
    }
}

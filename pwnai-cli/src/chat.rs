// pwnai-cli/src/chat.rs

//! The turn loop: stream a reply, run the tools it asks for, feed results back.

use anyhow::{Result, anyhow};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use pwnai_core::backends::stream::collect_stream;
use pwnai_core::{
    Backend, ChatBackend, ChatMessage, MessagePart, Role, ToolExecutionResult, ToolExecutionStatus,
    ToolInvoker, ToolUseContext, UseChatRequest,
};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MAX_ITERATIONS: usize = 10;

/// What one turn produced.
#[derive(Debug, Default)]
pub struct TurnSummary {
    pub text: String,
    pub tool_results: Vec<ToolExecutionResult>,
    pub iterations: usize,
}

pub struct ChatSession {
    backend: Backend,
    invoker: ToolInvoker,
    chat_id: String,
    messages: Vec<ChatMessage>,
    preamble: Option<String>,
    show_progress: bool,
}

impl ChatSession {
    pub fn new(backend: Backend, invoker: ToolInvoker) -> Self {
        Self {
            backend,
            invoker,
            chat_id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            preamble: None,
            show_progress: true,
        }
    }

    /// Text placed before the first prompt of every conversation.
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Starts a fresh conversation.
    pub fn reset(&mut self) {
        self.chat_id = Uuid::new_v4().to_string();
        self.messages.clear();
        info!(chat_id = %self.chat_id, "Started new conversation");
    }

    fn spinner(&self, message: &str) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "-"]),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Ok(pb)
    }

    /// Runs one user turn. On error the conversation is rolled back to where it was.
    pub async fn run_turn(&mut self, prompt: &str, cancel: &CancellationToken) -> Result<TurnSummary> {
        let checkpoint = self.messages.len();
        let result = self.drive_turn(prompt, cancel).await;
        if result.is_err() {
            self.messages.truncate(checkpoint);
        }
        result
    }

    async fn drive_turn(&mut self, prompt: &str, cancel: &CancellationToken) -> Result<TurnSummary> {
        let content = match (&self.preamble, self.messages.is_empty()) {
            (Some(preamble), true) => format!("{}\n\n{}", preamble, prompt),
            _ => prompt.to_string(),
        };
        self.messages.push(ChatMessage::user(content));

        let ctx = ToolUseContext::new(self.chat_id.clone(), cancel.clone());
        let mut summary = TurnSummary::default();

        for iteration in 1..=MAX_ITERATIONS {
            summary.iterations = iteration;
            let request = UseChatRequest {
                chat_id: self.chat_id.clone(),
                messages: self.messages.clone(),
                tools: self.invoker.registry().specs(),
            };
            debug!(chat_id = %self.chat_id, iteration, backend = self.backend.api_type(), "Requesting completion");

            let pb = self.spinner("Thinking...")?;
            let outcome = collect_stream(self.backend.stream_completion(cancel.child_token(), request)).await;
            pb.finish_and_clear();

            if let Some(error) = outcome.error {
                return Err(anyhow!(error));
            }
            if !outcome.text.is_empty() {
                println!("\n{}", outcome.text);
            }

            if outcome.tool_calls.is_empty() {
                if !outcome.text.is_empty() {
                    self.messages.push(ChatMessage::assistant(outcome.text.clone()));
                }
                summary.text = outcome.text;
                return Ok(summary);
            }

            let mut parts = Vec::with_capacity(outcome.tool_calls.len() + 1);
            if !outcome.text.is_empty() {
                parts.push(MessagePart::Text {
                    text: outcome.text.clone(),
                });
            }
            for call in &outcome.tool_calls {
                parts.push(MessagePart::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: serde_json::from_str(&call.args)
                        .unwrap_or_else(|_| Value::Object(Default::default())),
                });
            }
            self.messages.push(ChatMessage::with_parts(Role::Assistant, parts));

            for call in &outcome.tool_calls {
                let result = self.invoker.invoke(call, &ctx).await;
                print_tool_result(&result);
                self.messages.push(result.to_message());
                summary.tool_results.push(result);
            }

            if cancel.is_cancelled() {
                return Err(anyhow!("turn cancelled"));
            }
        }

        warn!(chat_id = %self.chat_id, "Reached {} iterations without a final answer", MAX_ITERATIONS);
        Err(anyhow!(
            "stopped after {} iterations without a final answer",
            MAX_ITERATIONS
        ))
    }
}

fn print_tool_result(result: &ToolExecutionResult) {
    let marker = match result.status {
        ToolExecutionStatus::Success => "✔".green(),
        ToolExecutionStatus::Denied => "✖".yellow(),
        ToolExecutionStatus::Failure => "✖".red(),
    };
    println!("{} {}", marker, result.description.dimmed());
    if result.status == ToolExecutionStatus::Failure {
        println!("  {}", result.output.red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwnai_core::api::ChatClient;
    use pwnai_core::async_trait;
    use pwnai_core::models::chat::{ChatResponse, ContentBlock};
    use pwnai_core::tools::fs::ReadDirTool;
    use pwnai_core::tools::lifecycle::AutoApprover;
    use pwnai_core::{ClaudeBackend, PwnaiError, ToolRegistry, ToolSpec};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct Scripted {
        replies: Mutex<VecDeque<Result<ChatResponse, PwnaiError>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatClient for Scripted {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<ChatResponse, PwnaiError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(PwnaiError::provider("script exhausted")))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn session(replies: Vec<Result<ChatResponse, PwnaiError>>) -> (ChatSession, Arc<Scripted>) {
        let client = Arc::new(Scripted {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        });
        let mut registry = ToolRegistry::new();
        registry.register(ReadDirTool).unwrap();
        let invoker = ToolInvoker::new(Arc::new(registry), Arc::new(AutoApprover));
        let backend = Backend::Claude(ClaudeBackend::new(client.clone(), None));
        (ChatSession::new(backend, invoker).without_progress(), client)
    }

    fn text_reply(text: &str) -> ChatResponse {
        ChatResponse {
            id: "msg_text".into(),
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: Some("end_turn".into()),
        }
    }

    #[tokio::test]
    async fn test_tool_round_trip_then_answer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let tool_reply = ChatResponse {
            id: "msg_tool".into(),
            content: vec![ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "read_dir".into(),
                input: json!({"path": dir.path().to_string_lossy()}),
            }],
            stop_reason: Some("tool_use".into()),
        };
        let (mut session, client) = session(vec![Ok(tool_reply), Ok(text_reply("One file: notes.txt"))]);

        let summary = session
            .run_turn("what is in the dir?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.text, "One file: notes.txt");
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.tool_results.len(), 1);
        assert_eq!(summary.tool_results[0].tool_call_id, "toolu_1");
        assert_eq!(summary.tool_results[0].status, ToolExecutionStatus::Success);

        let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);

        let second_request = &client.seen.lock().unwrap()[1];
        match &second_request[2].parts[0] {
            MessagePart::ToolResult { tool_use_id, content, is_error } => {
                assert_eq!(tool_use_id, "toolu_1");
                assert!(content.contains("notes.txt"));
                assert!(!is_error);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_error_rolls_back_turn() {
        let (mut session, _) = session(vec![Err(PwnaiError::provider("API error: 401"))]);
        let err = session
            .run_turn("hello", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API error: 401"));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_preamble_only_on_first_prompt() {
        let (session, client) = session(vec![Ok(text_reply("hi")), Ok(text_reply("again"))]);
        let mut session = session.with_preamble("Terminal widget_id: abcd1234");
        let cancel = CancellationToken::new();
        session.run_turn("hello", &cancel).await.unwrap();
        session.run_turn("next", &cancel).await.unwrap();

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0][0].content, "Terminal widget_id: abcd1234\n\nhello");
        assert_eq!(seen[1][2].content, "next");

        drop(seen);
        session.reset();
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_iterations() {
        let looping = |i: usize| {
            Ok(ChatResponse {
                id: format!("msg_{}", i),
                content: vec![ContentBlock::ToolUse {
                    id: format!("toolu_{}", i),
                    name: "no_such_tool".into(),
                    input: json!({}),
                }],
                stop_reason: Some("tool_use".into()),
            })
        };
        let (mut session, _) = session((0..MAX_ITERATIONS).map(looping).collect());
        let err = session
            .run_turn("loop", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stopped after 10 iterations"));
        assert!(session.messages().is_empty());
    }
}

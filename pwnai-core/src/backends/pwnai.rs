// pwnai-core/src/backends/pwnai.rs

use super::ChatBackend;
use super::stream::spawn_completion;
use crate::api::ChatClient;
use crate::models::chat::{ChatMessage, UseChatRequest, UseChatResponse};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const PWNAI_SYSTEM_PROMPT: &str = "\
You are PwnAI, an assistant for authorized penetration testing engagements.

You work inside the operator's terminal workspace. You can read terminal scrollback, \
inspect the output of the last command, run commands in a terminal, list directories, \
and drive a Metasploit RPC server to scan targets, search and launch exploits, and \
interact with sessions.

Rules:
- Only act against targets the operator has stated are in scope.
- Prefer read-only reconnaissance before anything intrusive.
- State what you are about to do and why before calling a tool that changes state.
- Commands, exploits and raw RPC calls require operator approval; if a call is denied, \
do not retry it unchanged.
- Report findings concisely: hosts, open services, versions, likely vulnerabilities, \
and the evidence for each.";

/// The pentest-oriented backend. Always leads with [`PWNAI_SYSTEM_PROMPT`].
pub struct PwnaiBackend {
    client: Arc<dyn ChatClient>,
}

impl PwnaiBackend {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }
}

impl ChatBackend for PwnaiBackend {
    fn stream_completion(
        &self,
        cancel: CancellationToken,
        request: UseChatRequest,
    ) -> mpsc::Receiver<UseChatResponse> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::system(PWNAI_SYSTEM_PROMPT));
        messages.extend(request.messages);
        spawn_completion(
            self.client.clone(),
            cancel,
            request.chat_id,
            messages,
            request.tools,
        )
    }

    fn model(&self) -> &str {
        self.client.model()
    }

    fn api_type(&self) -> &'static str {
        "pwnai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::stream::collect_stream;
    use crate::backends::stream::tests::{ScriptedClient, tool_reply};
    use crate::models::chat::Role;

    #[tokio::test]
    async fn test_system_prompt_leads_the_conversation() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(tool_reply())]));
        let backend = PwnaiBackend::new(client.clone());
        let request = UseChatRequest {
            chat_id: "chat-1".into(),
            messages: vec![ChatMessage::user("scan 10.0.0.5")],
            tools: vec![],
        };

        let outcome = collect_stream(backend.stream_completion(CancellationToken::new(), request)).await;
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.tool_calls[0].id, "toolu_A");

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][0].role, Role::System);
        assert_eq!(seen[0][0].content, PWNAI_SYSTEM_PROMPT);
        assert_eq!(seen[0][1].content, "scan 10.0.0.5");
    }
}

// pwnai-core/src/backends/claude.rs

use super::ChatBackend;
use super::stream::spawn_completion;
use crate::api::ChatClient;
use crate::models::chat::{ChatMessage, UseChatRequest, UseChatResponse};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// General-purpose backend that talks to the model with an optional operator prompt.
pub struct ClaudeBackend {
    client: Arc<dyn ChatClient>,
    system_prompt: Option<String>,
}

impl ClaudeBackend {
    pub fn new(client: Arc<dyn ChatClient>, system_prompt: Option<String>) -> Self {
        Self {
            client,
            system_prompt,
        }
    }
}

impl ChatBackend for ClaudeBackend {
    fn stream_completion(
        &self,
        cancel: CancellationToken,
        request: UseChatRequest,
    ) -> mpsc::Receiver<UseChatResponse> {
        let messages = match self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(prompt) => std::iter::once(ChatMessage::system(prompt))
                .chain(request.messages)
                .collect(),
            None => request.messages,
        };
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
        "claude"
    }
}

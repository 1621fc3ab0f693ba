// pwnai-core/src/backends/stream.rs

//! Turns one provider reply into a stream of [`UseChatResponse`] events.
//!
//! A spawned task owns the provider call and the only sender. It emits at most one
//! `Content` event (all text blocks joined), then one `ToolCall` per tool-use block,
//! then exactly one terminal event, and drops the sender.
//!
//! On cancellation the task makes a single non-blocking attempt to deliver
//! `Error("request cancelled")` and closes. If that attempt fails because the
//! buffer is full, the consumer sees the channel close without a terminal event,
//! which it must read as cancellation.

use crate::api::ChatClient;
use crate::models::chat::{ChatMessage, ChatResponse, ToolCall, UseChatResponse};
use crate::models::tools::ToolSpec;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const STREAM_BUFFER: usize = 32;
pub const CANCELLED_MESSAGE: &str = "request cancelled";

/// Events for a completed reply, terminal `Done` included.
pub fn response_events(response: &ChatResponse) -> Vec<UseChatResponse> {
    let mut events = Vec::new();
    let text = response.text();
    if !text.is_empty() {
        events.push(UseChatResponse::Content(text));
    }
    events.extend(response.tool_calls().into_iter().map(UseChatResponse::ToolCall));
    events.push(UseChatResponse::Done);
    events
}

/// Starts the producer task and returns the receiving end.
pub fn spawn_completion(
    client: Arc<dyn ChatClient>,
    cancel: CancellationToken,
    chat_id: String,
    messages: Vec<ChatMessage>,
    tools: Vec<ToolSpec>,
) -> mpsc::Receiver<UseChatResponse> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        produce(client, cancel, &chat_id, messages, tools, tx).await;
    });
    rx
}

async fn produce(
    client: Arc<dyn ChatClient>,
    cancel: CancellationToken,
    chat_id: &str,
    messages: Vec<ChatMessage>,
    tools: Vec<ToolSpec>,
    tx: mpsc::Sender<UseChatResponse>,
) {
    let reply = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            notify_cancelled(&tx, chat_id);
            return;
        }
        reply = client.chat(&messages, &tools) => reply,
    };

    let events = match reply {
        Ok(response) => {
            debug!(chat_id, stop_reason = ?response.stop_reason, blocks = response.content.len(), "Provider replied");
            response_events(&response)
        }
        Err(e) => {
            warn!(chat_id, error = %e, "Provider call failed");
            vec![UseChatResponse::Error(e.to_string())]
        }
    };

    for event in events {
        let terminal = event.is_terminal();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                notify_cancelled(&tx, chat_id);
                return;
            }
            sent = tx.send(event) => {
                if sent.is_err() {
                    debug!(chat_id, "Stream receiver dropped, stopping producer");
                    return;
                }
            }
        }
        if terminal {
            return;
        }
    }
}

fn notify_cancelled(tx: &mpsc::Sender<UseChatResponse>, chat_id: &str) {
    debug!(chat_id, "Completion cancelled");
    let _ = tx.try_send(UseChatResponse::Error(CANCELLED_MESSAGE.to_string()));
}

/// Everything a stream delivered, gathered by [`collect_stream`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    /// Set for an `Error` event, or when the channel closed without a terminal event.
    pub error: Option<String>,
}

impl StreamOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref() == Some(CANCELLED_MESSAGE)
    }
}

/// Drains a stream to its end.
pub async fn collect_stream(mut rx: mpsc::Receiver<UseChatResponse>) -> StreamOutcome {
    let mut outcome = StreamOutcome::default();
    while let Some(event) = rx.recv().await {
        match event {
            UseChatResponse::Content(text) => outcome.text.push_str(&text),
            UseChatResponse::ToolCall(call) => outcome.tool_calls.push(call),
            UseChatResponse::Error(e) => {
                outcome.error = Some(e);
                return outcome;
            }
            UseChatResponse::Done => return outcome,
        }
    }
    outcome.error = Some(CANCELLED_MESSAGE.to_string());
    outcome
}

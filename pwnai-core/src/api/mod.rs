// pwnai-core/src/api/mod.rs

//! Model provider clients.

use crate::errors::PwnaiError;
use crate::models::chat::{ChatMessage, ChatResponse};
use crate::models::tools::ToolSpec;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace, warn};

pub mod claude;

/// A model provider: one request in, one complete reply out.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatResponse, PwnaiError>;

    fn model(&self) -> &str;
}

pub trait ChatApiProvider: Send + Sync {
    /// Builds the request payload for the specific API provider
    fn build_payload(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Value>;

    /// Parses the API response into the common ChatResponse format
    fn parse_response(&self, response_body: &str) -> Result<ChatResponse>;

    /// Builds the headers for the API request
    fn build_headers(&self) -> Result<HashMap<String, String>>;

    /// Gets the endpoint URL for the API request
    fn get_endpoint(&self) -> String;
}

/// Exponential backoff for rate limits, server errors and network failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(current.as_secs_f64() * self.backoff_factor),
            self.max_delay,
        )
    }
}

/// Helper function to format headers for logging, skipping credentials.
fn format_headers_for_log(headers: &HashMap<String, String>) -> String {
    let mut names: Vec<&str> = headers
        .keys()
        .map(String::as_str)
        .filter(|k| !k.eq_ignore_ascii_case("x-api-key") && !k.eq_ignore_ascii_case("authorization"))
        .collect();
    names.sort_unstable();
    names.join(", ")
}

/// Sends one chat request through `provider`, retrying transient failures.
pub async fn call_chat_completion_api(
    http_client: &Client,
    provider: &dyn ChatApiProvider,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
    retry: &RetryPolicy,
) -> Result<ChatResponse> {
    let endpoint = provider.get_endpoint();
    let headers = provider.build_headers()?;
    let payload = provider.build_payload(messages, tools)?;

    let mut header_map = reqwest::header::HeaderMap::new();
    for (key, value) in &headers {
        if let (Ok(name), Ok(val)) = (
            reqwest::header::HeaderName::from_bytes(key.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            header_map.insert(name, val);
        }
    }

    trace!(
        endpoint = %endpoint,
        headers = %format_headers_for_log(&headers),
        num_messages = messages.len(),
        num_tools = tools.len(),
        "Sending chat request"
    );

    let mut retries = 0;
    let mut current_delay = retry.initial_delay;

    loop {
        let response = match http_client
            .post(&endpoint)
            .headers(header_map.clone())
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                if retries < retry.max_retries {
                    retries += 1;
                    warn!(
                        "Network error sending request: {}. Retrying in {:?} (attempt {}/{})",
                        e, current_delay, retries, retry.max_retries
                    );
                    tokio::time::sleep(current_delay).await;
                    current_delay = retry.next_delay(current_delay);
                    continue;
                }
                return Err(anyhow!(
                    "Network error after {} retries: {}",
                    retry.max_retries,
                    e
                ));
            }
        };

        let status = response.status();

        if (status.as_u16() == 429 || status.is_server_error()) && retries < retry.max_retries {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);

            let wait_time = retry_after.unwrap_or(current_delay);
            retries += 1;
            warn!(
                "API request failed with status {}. Retrying in {:?} (attempt {}/{})",
                status, wait_time, retries, retry.max_retries
            );
            tokio::time::sleep(wait_time).await;
            current_delay = retry.next_delay(current_delay);
            continue;
        }

        let response_text = response
            .text()
            .await
            .context("Failed to read API response body")?;

        if !status.is_success() {
            debug!("API request failed. Status: {}, Body: {}", status, response_text);
            return Err(anyhow!("API error: {} - {}", status, response_text));
        }

        return provider.parse_response(&response_text);
    }
}

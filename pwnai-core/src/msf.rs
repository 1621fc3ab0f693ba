// pwnai-core/src/msf.rs

//! Client for the Metasploit RPC API (JSON transport).

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace};

pub const MSF_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize, Debug)]
struct RpcRequest<'a> {
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize, Debug, Default)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

pub struct MsfClient {
    endpoint: String,
    http_client: Client,
    token: RwLock<Option<String>>,
}

impl MsfClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_endpoint(format!("http://{}:{}/api/", host, port))
    }

    /// Client for an explicit RPC endpoint URL.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(MSF_TIMEOUT)
            .build()
            .context("Failed to build HTTP client for Metasploit RPC")?;
        Ok(Self {
            endpoint: endpoint.into(),
            http_client,
            token: RwLock::new(None),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn raw_call(&self, method: &str, params: Vec<Value>) -> Result<RpcResponse> {
        trace!(method, num_params = params.len(), "Sending Metasploit RPC request");
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&RpcRequest { method, params })
            .send()
            .await
            .with_context(|| format!("HTTP request for {} failed", method))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Metasploit RPC response body")?;
        serde_json::from_str(&body).with_context(|| {
            format!(
                "Failed to decode Metasploit RPC response (status {}): {}",
                status, body
            )
        })
    }

    /// Logs in with `auth.login` and keeps the returned token.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let response = self
            .raw_call(
                "auth.login",
                vec![Value::from(username), Value::from(password)],
            )
            .await
            .context("authentication failed")?;
        if let Some(error) = response.error {
            return Err(anyhow!("MSF error: {}", error));
        }
        let token = response
            .result
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("auth.login response did not contain a token"))?;
        *self.token.write().await = Some(token.to_string());
        debug!(endpoint = %self.endpoint, "Authenticated with Metasploit RPC");
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Calls `method` with the session token prepended to `params`.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("not authenticated with Metasploit RPC"))?;

        let mut all_params = Vec::with_capacity(params.len() + 1);
        all_params.push(Value::String(token));
        all_params.extend(params);

        let response = self.raw_call(method, all_params).await?;
        if let Some(error) = response.error {
            return Err(anyhow!("MSF error: {}", error));
        }
        Ok(response.result)
    }

    /// Probes `core.version` with the current token.
    pub async fn is_connected(&self) -> bool {
        if !self.is_authenticated().await {
            return false;
        }
        self.call("core.version", Vec::new()).await.is_ok()
    }
}

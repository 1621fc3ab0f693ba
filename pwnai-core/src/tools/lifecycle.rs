// pwnai-core/src/tools/lifecycle.rs

//! Turns a model-issued [`ToolCall`] into a [`ToolExecutionResult`].

use super::ToolRegistry;
use super::schema::parse_args;
use crate::errors::PwnaiError;
use crate::models::chat::ToolCall;
use crate::models::tools::{ToolExecutionResult, ToolExecutionStatus, ToolUseContext};
use crate::telemetry::{NoopTelemetry, TelemetrySink, ToolUseEvent};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// A pending call that needs a human decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Why approval is needed, e.g. `Execute potentially dangerous command: rm -rf build`.
    pub reason: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

/// The human approval mechanism.
#[async_trait]
pub trait ToolApprover: Send + Sync {
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Approves everything. For non-interactive runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprover;

#[async_trait]
impl ToolApprover for AutoApprover {
    async fn request_approval(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Approved
    }
}

/// Denies everything that asks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyApprover;

#[async_trait]
impl ToolApprover for DenyApprover {
    async fn request_approval(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Denied
    }
}

/// Dispatches tool calls through the registry.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    approver: Arc<dyn ToolApprover>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, approver: Arc<dyn ToolApprover>) -> Self {
        Self {
            registry,
            approver,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs one call to completion. Never fails: every error becomes a result
    /// with a non-success status whose output is the error text.
    pub async fn invoke(&self, call: &ToolCall, ctx: &ToolUseContext) -> ToolExecutionResult {
        let ctx = ctx.for_call(&call.id, &call.name);
        let started = Instant::now();
        debug!(tool_call_id = %call.id, tool_name = %call.name, args = %call.args, "Invoking tool");

        let parsed = parse_args(&call.args);

        let (log_name, description, result) = match self.registry.get(&call.name) {
            Ok(tool) => {
                let log_name = tool.spec().log_name;
                match &parsed {
                    Ok(raw) => {
                        let outcome = tool.run(raw, &ctx, self.approver.as_ref()).await;
                        (log_name, outcome.description, outcome.result)
                    }
                    Err(e) => (log_name, format!("error parsing input: {}", e), Err(e.clone())),
                }
            }
            Err(e) => (call.name.clone(), format!("unknown tool {}", call.name), Err(e)),
        };
        let input = parsed.unwrap_or_else(|_| Value::String(call.args.clone()));

        let (status, output) = match result {
            Ok(output) => (ToolExecutionStatus::Success, output),
            Err(e @ PwnaiError::ApprovalDenied(_)) => (ToolExecutionStatus::Denied, e.to_string()),
            Err(e) => {
                error!(tool_call_id = %call.id, tool_name = %call.name, kind = e.kind(), error = %e, "Tool call failed");
                (ToolExecutionStatus::Failure, e.to_string())
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(tool_call_id = %call.id, tool = %log_name, status = ?status, duration_ms, "{}", description);
        self.telemetry.record_tool_use(ToolUseEvent {
            tool_name: call.name.clone(),
            log_name,
            status,
            duration_ms,
        });

        ToolExecutionResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            input,
            output,
            status,
            description,
        }
    }
}

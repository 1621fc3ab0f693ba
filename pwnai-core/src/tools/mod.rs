// pwnai-core/src/tools/mod.rs

//! Tool definitions and the per-call state machine.
//!
//! Each tool implements [`Tool`] with typed input and output. [`RegisteredTool`]
//! pairs a tool with its compiled input schema and erases those types behind
//! [`DynTool`], so tools of different families can live in one [`ToolRegistry`].
//! It drives a call through parse → verify → approval → execute → describe.

pub mod fs;
pub mod lifecycle;
pub mod pentest;
pub mod schema;
pub mod term;

use crate::errors::PwnaiError;
use crate::models::tools::{ToolSpec, ToolUseContext};
use async_trait::async_trait;
use lifecycle::{ApprovalDecision, ApprovalRequest, ToolApprover};
use schema::InputSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One invocable capability exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + Sync;
    type Output: Serialize + Send + Sync;

    fn spec(&self) -> ToolSpec;

    /// Validates `raw` against the input schema and decodes it. Compiles the
    /// schema each time; calls through the registry use the cached one.
    fn parse_input(&self, raw: &Value) -> Result<Self::Input, PwnaiError> {
        schema::decode_input(&Tool::spec(self).input_schema, raw)
    }

    /// Short human readable line for logs and approval prompts.
    fn describe(&self, input: &Self::Input, output: Option<&Self::Output>) -> String;

    /// `Some(reason)` when the call must be approved before it runs.
    fn approval(&self, _input: &Self::Input) -> Option<String> {
        None
    }

    /// Semantic checks that must pass before any side effect.
    fn verify(&self, _input: &Self::Input) -> Result<(), PwnaiError> {
        Ok(())
    }

    async fn execute(
        &self,
        input: &Self::Input,
        ctx: &ToolUseContext,
    ) -> Result<Self::Output, PwnaiError>;
}

/// What a single pass through the state machine produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub description: String,
    pub result: Result<String, PwnaiError>,
}

/// Type-erased view of a [`Tool`].
#[async_trait]
pub trait DynTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Describes a call from its raw input. Never fails.
    fn describe_raw(&self, raw: &Value) -> String;

    async fn run(
        &self,
        raw: &Value,
        ctx: &ToolUseContext,
        approver: &dyn ToolApprover,
    ) -> ToolOutcome;
}

/// A tool with its input schema compiled at registration.
pub struct RegisteredTool<T: Tool> {
    tool: T,
    schema: InputSchema,
}

impl<T: Tool> RegisteredTool<T> {
    pub fn new(tool: T) -> Result<Self, PwnaiError> {
        let spec = Tool::spec(&tool);
        let schema = InputSchema::compile(&spec.input_schema)
            .map_err(|e| e.with_context(format!("tool '{}'", spec.name)))?;
        Ok(Self { tool, schema })
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }
}

#[async_trait]
impl<T: Tool> DynTool for RegisteredTool<T> {
    fn spec(&self) -> ToolSpec {
        Tool::spec(&self.tool)
    }

    fn describe_raw(&self, raw: &Value) -> String {
        match self.schema.decode::<T::Input>(raw) {
            Ok(input) => self.tool.describe(&input, None),
            Err(e) => format!("error parsing input: {}", e),
        }
    }

    async fn run(
        &self,
        raw: &Value,
        ctx: &ToolUseContext,
        approver: &dyn ToolApprover,
    ) -> ToolOutcome {
        let tool = &self.tool;
        let input = match self.schema.decode::<T::Input>(raw) {
            Ok(input) => input,
            Err(e) => {
                warn!(tool_call_id = %ctx.tool_call_id, tool_name = %ctx.tool_name, error = %e, "Tool input rejected");
                return ToolOutcome {
                    description: format!("error parsing input: {}", e),
                    result: Err(e),
                };
            }
        };
        let description = tool.describe(&input, None);

        if let Err(e) = tool.verify(&input) {
            warn!(tool_call_id = %ctx.tool_call_id, error = %e, "Tool input failed verification");
            return ToolOutcome {
                description,
                result: Err(e),
            };
        }

        if let Some(reason) = tool.approval(&input) {
            let request = ApprovalRequest {
                tool_call_id: ctx.tool_call_id.clone(),
                tool_name: ctx.tool_name.clone(),
                reason,
                description: description.clone(),
            };
            debug!(tool_call_id = %ctx.tool_call_id, reason = %request.reason, "Awaiting approval");
            let decision = tokio::select! {
                _ = ctx.cancel.cancelled() => ApprovalDecision::Denied,
                d = approver.request_approval(&request) => d,
            };
            if decision == ApprovalDecision::Denied {
                info!(tool_call_id = %ctx.tool_call_id, tool_name = %ctx.tool_name, "Tool call denied");
                return ToolOutcome {
                    description,
                    result: Err(PwnaiError::ApprovalDenied(format!(
                        "user declined {}",
                        request.reason
                    ))),
                };
            }
        }

        let executed = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(PwnaiError::execution("cancelled")),
            r = tool.execute(&input, ctx) => r,
        };

        match executed {
            Ok(output) => {
                let description = tool.describe(&input, Some(&output));
                let result = render_output(&output);
                ToolOutcome {
                    description,
                    result,
                }
            }
            Err(e) => ToolOutcome {
                description,
                result: Err(e),
            },
        }
    }
}

/// Renders tool output as the text sent back to the model.
///
/// String outputs pass through as-is; everything else is compact JSON.
fn render_output<O: Serialize>(output: &O) -> Result<String, PwnaiError> {
    let value = serde_json::to_value(output)
        .map_err(|e| PwnaiError::execution(format!("failed to serialize output: {}", e)))?;
    Ok(match value {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Name → tool table, built at startup and shared read-only.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn DynTool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool and compiles its input schema. Names must be unique.
    pub fn register<T: Tool>(&mut self, tool: T) -> Result<(), PwnaiError> {
        let name = Tool::spec(&tool).name;
        if self.tools.contains_key(&name) {
            return Err(PwnaiError::config(format!(
                "tool '{}' is already registered",
                name
            )));
        }
        let registered = RegisteredTool::new(tool)?;
        self.order.push(name.clone());
        self.tools.insert(name, Arc::new(registered));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DynTool>, PwnaiError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| PwnaiError::not_found(format!("tool '{}'", name)))
    }

    /// Specs in registration order, as sent to the provider.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// pwnai-core/src/lib.rs

#![doc = include_str!("../../README.md")]

pub mod api;
pub mod backends;
pub mod config;
pub mod errors;
pub mod msf;
pub mod telemetry;
pub mod terminal;
pub mod tools;
pub mod utils;

pub mod models {
    pub mod chat;
    pub mod tools;
}

pub use async_trait::async_trait;

pub use backends::{Backend, BackendRegistry, ChatBackend, ClaudeBackend, PwnaiBackend};
pub use config::{BackendConfig, BackendKind, MsfConfig, PwnaiConfig};
pub use errors::PwnaiError;
pub use models::chat::{
    ChatMessage, ChatResponse, MessagePart, Role, ToolCall, UseChatRequest, UseChatResponse,
};
pub use models::tools::{ToolExecutionResult, ToolExecutionStatus, ToolSpec, ToolUseContext};
pub use tools::lifecycle::{ApprovalDecision, ApprovalRequest, ToolApprover, ToolInvoker};
pub use tools::{DynTool, RegisteredTool, Tool, ToolRegistry};

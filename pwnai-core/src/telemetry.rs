// pwnai-core/src/telemetry.rs
//! Usage telemetry hooks. This build only ships the no-op sink.

use crate::models::tools::ToolExecutionStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUseEvent {
    pub tool_name: String,
    pub log_name: String,
    pub status: ToolExecutionStatus,
    pub duration_ms: u64,
}

pub trait TelemetrySink: Send + Sync {
    fn record_tool_use(&self, event: ToolUseEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_tool_use(&self, event: ToolUseEvent) {
        tracing::trace!(tool = %event.log_name, "telemetry disabled, dropping tool use event");
    }
}

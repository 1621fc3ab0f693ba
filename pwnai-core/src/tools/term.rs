// pwnai-core/src/tools/term.rs

//! Terminal tools: scrollback reads, last-command output and run-command.

use super::Tool;
use super::schema::saturating_u64;
use crate::errors::PwnaiError;
use crate::models::tools::{ToolSpec, ToolUseContext, object_schema};
use crate::terminal::{RuntimeInfo, ScrollbackLines, ScrollbackRequest, ShellState, TerminalStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_SCROLLBACK_COUNT: u64 = 200;
pub const MAX_SCROLLBACK_COUNT: u64 = 1000;
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines read back after a command has been sent.
const RUN_COMMAND_OUTPUT_LINES: u64 = 200;

const DANGEROUS_PATTERNS: &[&str] = &[
    "rm ", "del ", "format", "mkfs", "dd ", "> /dev/", "sudo rm", "chmod -r", "chown -r",
];

/// Waits used by `term_run_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCommandTiming {
    pub poll_interval: Duration,
    pub poll_deadline: Duration,
    pub settle: Duration,
    pub no_integration_wait: Duration,
    pub overall_timeout: Duration,
}

impl Default for RunCommandTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            poll_deadline: Duration::from_secs(25),
            settle: Duration::from_millis(300),
            no_integration_wait: Duration::from_secs(2),
            overall_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Running,
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub command: String,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exitcode: Option<i32>,
}

impl CommandInfo {
    /// Last-command summary, present only when shell integration reports one.
    pub fn from_runtime(info: &RuntimeInfo) -> Option<Self> {
        if !info.shell_integration || info.shell_last_cmd.is_empty() {
            return None;
        }
        let (status, exitcode) = match info.shell_state {
            ShellState::RunningCommand => (CommandStatus::Running, None),
            ShellState::Ready => (CommandStatus::Completed, Some(info.shell_last_cmd_exit_code)),
            ShellState::Unknown => return None,
        };
        Some(Self {
            command: info.shell_last_cmd.clone(),
            status,
            exitcode,
        })
    }
}

/// A page of terminal output as returned to the model.
///
/// Always `line_start <= line_end <= total_lines`; `next_start` is set exactly when
/// `has_more` is.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScrollbackWindow {
    pub total_lines: u64,
    pub line_start: u64,
    pub line_end: u64,
    pub returned_lines: u64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_last_output_sec: Option<u64>,
    pub has_more: bool,
    pub next_start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_command: Option<CommandInfo>,
}

/// Derives the window the model sees from a store read.
pub fn build_window(
    request: &ScrollbackRequest,
    result: ScrollbackLines,
    now_ms: i64,
    last_command: Option<CommandInfo>,
) -> ScrollbackWindow {
    let total = result.total_lines;
    let returned = result.lines.len() as u64;
    let line_end = if request.last_command {
        result.line_start.saturating_add(returned)
    } else {
        request.line_end
    }
    .min(total);
    let line_start = result.line_start.min(line_end);
    let has_more = line_end < total;

    let since_last_output_sec =
        (result.last_updated > 0).then(|| (now_ms.saturating_sub(result.last_updated) / 1000).max(0) as u64);

    ScrollbackWindow {
        total_lines: total,
        line_start,
        line_end,
        returned_lines: returned,
        content: result.lines.join("\n"),
        since_last_output_sec,
        has_more,
        next_start: has_more.then_some(line_end),
        last_command,
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Store handle shared by the terminal tools of one container (tab).
#[derive(Clone)]
pub struct TerminalAccess {
    store: Arc<dyn TerminalStore>,
    container_id: String,
    resolve_timeout: Duration,
}

impl TerminalAccess {
    pub fn new(store: Arc<dyn TerminalStore>, container_id: impl Into<String>) -> Self {
        Self {
            store,
            container_id: container_id.into(),
            resolve_timeout: RESOLVE_TIMEOUT,
        }
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub async fn resolve(&self, widget_id: &str) -> Result<String, PwnaiError> {
        let lookup = self
            .store
            .resolve_id_from_prefix(&self.container_id, widget_id, self.resolve_timeout);
        match tokio::time::timeout(self.resolve_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(PwnaiError::execution(format!(
                "timed out resolving widget '{}' after {:?}",
                widget_id, self.resolve_timeout
            ))),
        }
    }

    pub async fn runtime_info(&self, full_id: &str) -> Option<RuntimeInfo> {
        self.store.get_runtime_info(full_id).await
    }

    /// Reads a window from an already resolved terminal.
    pub async fn read_window(
        &self,
        full_id: &str,
        request: ScrollbackRequest,
    ) -> Result<ScrollbackWindow, PwnaiError> {
        let lines = self.store.get_scrollback_lines(full_id, request).await?;
        let last_command = self
            .store
            .get_runtime_info(full_id)
            .await
            .and_then(|info| CommandInfo::from_runtime(&info));
        Ok(build_window(&request, lines, now_millis(), last_command))
    }
}

fn widget_id_schema() -> serde_json::Value {
    json!({
        "type": "string",
        "minLength": 1,
        "description": "8-character widget ID of the terminal widget"
    })
}

// --- term_get_scrollback ---

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScrollbackInput {
    pub widget_id: String,
    #[serde(default, deserialize_with = "saturating_u64")]
    pub line_start: u64,
    #[serde(default = "default_count", deserialize_with = "saturating_u64")]
    pub count: u64,
}

fn default_count() -> u64 {
    DEFAULT_SCROLLBACK_COUNT
}

impl ScrollbackInput {
    /// Requested count with the upper clamp applied.
    pub fn effective_count(&self) -> u64 {
        self.count.min(MAX_SCROLLBACK_COUNT)
    }

    pub fn request(&self) -> ScrollbackRequest {
        ScrollbackRequest {
            line_start: self.line_start,
            line_end: self.line_start.saturating_add(self.effective_count()),
            last_command: false,
        }
    }
}

pub struct TermGetScrollbackTool {
    terminals: TerminalAccess,
}

impl TermGetScrollbackTool {
    pub fn new(terminals: TerminalAccess) -> Self {
        Self { terminals }
    }
}

#[async_trait]
impl Tool for TermGetScrollbackTool {
    type Input = ScrollbackInput;
    type Output = ScrollbackWindow;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "term_get_scrollback".to_string(),
            display_name: "Read Terminal".to_string(),
            description: "Fetch terminal scrollback from a widget as plain text. Index 0 is the most recent line; indices increase going upward (older lines). Also returns last command and exit code if shell integration is enabled.".to_string(),
            log_name: "term:getscrollback".to_string(),
            input_schema: object_schema(
                vec![
                    ("widget_id", widget_id_schema()),
                    (
                        "line_start",
                        json!({
                            "type": "integer",
                            "minimum": 0,
                            "default": 0,
                            "description": "Logical start index where 0 = most recent line (default: 0)."
                        }),
                    ),
                    (
                        "count",
                        json!({
                            "type": "integer",
                            "minimum": 1,
                            "default": DEFAULT_SCROLLBACK_COUNT,
                            "description": "Number of lines to return from line_start (default: 200, at most 1000)."
                        }),
                    ),
                ],
                &["widget_id"],
            ),
            strict: false,
        }
    }

    fn describe(&self, input: &ScrollbackInput, _output: Option<&ScrollbackWindow>) -> String {
        let count = input.effective_count();
        if input.line_start == 0 && count == DEFAULT_SCROLLBACK_COUNT {
            format!(
                "reading terminal output from {} (last {} lines)",
                input.widget_id, count
            )
        } else {
            format!(
                "reading terminal output from {} (lines {}-{})",
                input.widget_id,
                input.line_start,
                input.line_start.saturating_add(count)
            )
        }
    }

    async fn execute(
        &self,
        input: &ScrollbackInput,
        _ctx: &ToolUseContext,
    ) -> Result<ScrollbackWindow, PwnaiError> {
        let full_id = self.terminals.resolve(&input.widget_id).await?;
        self.terminals
            .read_window(&full_id, input.request())
            .await
            .map_err(|e| e.with_context("failed to read terminal output"))
    }
}

// --- term_command_output ---

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WidgetInput {
    pub widget_id: String,
}

pub struct TermCommandOutputTool {
    terminals: TerminalAccess,
}

impl TermCommandOutputTool {
    pub fn new(terminals: TerminalAccess) -> Self {
        Self { terminals }
    }
}

#[async_trait]
impl Tool for TermCommandOutputTool {
    type Input = WidgetInput;
    type Output = ScrollbackWindow;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "term_command_output".to_string(),
            display_name: "Last Command Output".to_string(),
            description: "Retrieve output from the most recent command in a terminal widget. Requires shell integration to be enabled. Returns the command text, exit code, and up to 1000 lines of output.".to_string(),
            log_name: "term:commandoutput".to_string(),
            input_schema: object_schema(vec![("widget_id", widget_id_schema())], &["widget_id"]),
            strict: false,
        }
    }

    fn describe(&self, input: &WidgetInput, _output: Option<&ScrollbackWindow>) -> String {
        format!("reading last command output from {}", input.widget_id)
    }

    async fn execute(
        &self,
        input: &WidgetInput,
        _ctx: &ToolUseContext,
    ) -> Result<ScrollbackWindow, PwnaiError> {
        let full_id = self.terminals.resolve(&input.widget_id).await?;
        let integrated = self
            .terminals
            .runtime_info(&full_id)
            .await
            .is_some_and(|info| info.shell_integration);
        if !integrated {
            return Err(PwnaiError::execution(format!(
                "shell integration is not enabled for terminal {}",
                input.widget_id
            )));
        }
        let request = ScrollbackRequest {
            line_start: 0,
            line_end: 0,
            last_command: true,
        };
        self.terminals
            .read_window(&full_id, request)
            .await
            .map_err(|e| e.with_context("failed to read command output"))
    }
}

// --- term_run_command ---

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunCommandInput {
    pub widget_id: String,
    pub command: String,
}

/// Reason to ask before running `command`, if it looks destructive.
pub fn dangerous_command_reason(command: &str) -> Option<String> {
    let lowered = command.to_lowercase();
    DANGEROUS_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
        .then(|| format!("Execute potentially dangerous command: {}", command))
}

pub struct TermRunCommandTool {
    terminals: TerminalAccess,
    timing: RunCommandTiming,
}

impl TermRunCommandTool {
    pub fn new(terminals: TerminalAccess) -> Self {
        Self {
            terminals,
            timing: RunCommandTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: RunCommandTiming) -> Self {
        self.timing = timing;
        self
    }

    async fn send_and_collect(&self, input: &RunCommandInput) -> Result<ScrollbackWindow, PwnaiError> {
        let full_id = self.terminals.resolve(&input.widget_id).await?;

        let before = self.terminals.runtime_info(&full_id).await;
        let integrated = before.as_ref().is_some_and(|info| info.shell_integration);
        let last_cmd_before = match (&before, integrated) {
            (Some(info), true) => info.shell_last_cmd.clone(),
            _ => String::new(),
        };

        let line = format!("{}\n", input.command);
        self.terminals
            .store
            .send_input(&full_id, line.as_bytes())
            .await
            .map_err(|e| e.with_context("failed to send command to terminal"))?;

        if integrated {
            if !self.wait_for_command(&full_id, &last_cmd_before).await {
                debug!(widget_id = %input.widget_id, "Command still running at deadline, returning available output");
            }
        } else {
            tokio::time::sleep(self.timing.no_integration_wait).await;
        }

        let request = ScrollbackRequest {
            line_start: 0,
            line_end: RUN_COMMAND_OUTPUT_LINES,
            last_command: integrated,
        };
        self.terminals
            .read_window(&full_id, request)
            .await
            .map_err(|e| e.with_context("failed to read command output"))
    }

    /// Polls until the shell reports a different last command. Returns false when
    /// the deadline passed first.
    async fn wait_for_command(&self, full_id: &str, last_cmd_before: &str) -> bool {
        let deadline = Instant::now() + self.timing.poll_deadline;
        while Instant::now() < deadline {
            tokio::time::sleep_until((Instant::now() + self.timing.poll_interval).min(deadline)).await;
            let changed = match tokio::time::timeout_at(deadline, self.terminals.runtime_info(full_id)).await {
                Ok(info) => info.is_some_and(|info| info.shell_last_cmd != last_cmd_before),
                Err(_) => return false,
            };
            if changed {
                tokio::time::sleep(self.timing.settle).await;
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl Tool for TermRunCommandTool {
    type Input = RunCommandInput;
    type Output = ScrollbackWindow;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "term_run_command".to_string(),
            display_name: "Run Command".to_string(),
            description: "Execute a command in a terminal widget and return its output. The command will be sent to the terminal as if typed by the user, followed by Enter. If shell integration is enabled, waits for command completion (up to 25 seconds). Otherwise waits 2 seconds.".to_string(),
            log_name: "term:runcommand".to_string(),
            input_schema: object_schema(
                vec![
                    ("widget_id", widget_id_schema()),
                    (
                        "command",
                        json!({
                            "type": "string",
                            "minLength": 1,
                            "description": "Command to execute in the terminal"
                        }),
                    ),
                ],
                &["widget_id", "command"],
            ),
            strict: false,
        }
    }

    fn describe(&self, input: &RunCommandInput, _output: Option<&ScrollbackWindow>) -> String {
        format!(
            "running command in terminal {}: {}",
            input.widget_id, input.command
        )
    }

    fn approval(&self, input: &RunCommandInput) -> Option<String> {
        dangerous_command_reason(&input.command)
    }

    async fn execute(
        &self,
        input: &RunCommandInput,
        _ctx: &ToolUseContext,
    ) -> Result<ScrollbackWindow, PwnaiError> {
        match tokio::time::timeout(self.timing.overall_timeout, self.send_and_collect(input)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(widget_id = %input.widget_id, "term_run_command exceeded its time limit");
                Err(PwnaiError::execution(format!(
                    "command did not finish within {:?}",
                    self.timing.overall_timeout
                )))
            }
        }
    }
}

/// Registers the three terminal tools for one container.
pub fn register_terminal_tools(
    registry: &mut super::ToolRegistry,
    terminals: TerminalAccess,
    timing: RunCommandTiming,
) -> Result<(), PwnaiError> {
    registry.register(TermGetScrollbackTool::new(terminals.clone()))?;
    registry.register(TermCommandOutputTool::new(terminals.clone()))?;
    registry.register(TermRunCommandTool::new(terminals).with_timing(timing))?;
    Ok(())
}

// pwnai-core/src/terminal/mod.rs

//! The terminal/session store the terminal tools talk to.
//!
//! Scrollback is addressed from the bottom: index 0 is the most recent line and
//! indices grow towards older output.

pub mod local;

use crate::errors::PwnaiError;
use async_trait::async_trait;
use std::time::Duration;

/// A scrollback read. `line_end` is exclusive.
///
/// With `last_command` set the store returns the output of the most recent command
/// instead and ignores the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollbackRequest {
    pub line_start: u64,
    pub line_end: u64,
    pub last_command: bool,
}

/// Lines returned by the store, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScrollbackLines {
    pub lines: Vec<String>,
    pub total_lines: u64,
    pub line_start: u64,
    /// Unix milliseconds of the last output, 0 when unknown.
    pub last_updated: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellState {
    Ready,
    RunningCommand,
    #[default]
    Unknown,
}

/// Shell-integration state of a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeInfo {
    pub shell_integration: bool,
    pub shell_state: ShellState,
    pub shell_last_cmd: String,
    pub shell_last_cmd_exit_code: i32,
}

#[async_trait]
pub trait TerminalStore: Send + Sync {
    /// Expands a short widget id to the full id within `container_id`.
    async fn resolve_id_from_prefix(
        &self,
        container_id: &str,
        short_id: &str,
        timeout: Duration,
    ) -> Result<String, PwnaiError>;

    async fn get_scrollback_lines(
        &self,
        full_id: &str,
        request: ScrollbackRequest,
    ) -> Result<ScrollbackLines, PwnaiError>;

    /// Writes raw bytes to the terminal as if typed.
    async fn send_input(&self, full_id: &str, data: &[u8]) -> Result<(), PwnaiError>;

    async fn get_runtime_info(&self, full_id: &str) -> Option<RuntimeInfo>;
}

/// Returns the `[line_start, line_end)` window of `lines` counted from the newest
/// line, in chronological order.
pub fn slice_recent<'a, I>(lines: I, line_start: u64, line_end: u64) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
    I::IntoIter: ExactSizeIterator,
{
    let lines = lines.into_iter();
    let total = lines.len();
    let start = usize::try_from(line_start).unwrap_or(usize::MAX).min(total);
    let end = usize::try_from(line_end).unwrap_or(usize::MAX).min(total);
    if start >= end {
        return Vec::new();
    }
    lines.skip(total - end).take(end - start).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {}", i)).collect()
    }

    #[test]
    fn test_slice_recent_from_bottom() {
        let lines = numbered(10);
        assert_eq!(slice_recent(&lines, 0, 2), vec!["line 9", "line 10"]);
        assert_eq!(slice_recent(&lines, 8, 100), vec!["line 1", "line 2"]);
        assert_eq!(slice_recent(&lines, 0, 1000).len(), 10);
    }

    #[test]
    fn test_slice_recent_out_of_range() {
        let lines = numbered(3);
        assert!(slice_recent(&lines, 5, 10).is_empty());
        assert!(slice_recent(&lines, 2, 2).is_empty());
    }
}

// pwnai-core/src/terminal/local.rs

//! A [`TerminalStore`] backed by local shell processes.
//!
//! Each terminal is a `sh` child whose stdout and stderr are collected line by
//! line into a bounded scrollback buffer. There is no shell integration, so the
//! run-command tool falls back to its fixed wait.

use super::{RuntimeInfo, ScrollbackLines, ScrollbackRequest, TerminalStore, slice_recent};
use crate::errors::PwnaiError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_SCROLLBACK_LINES: usize = 10_000;

struct LocalTerminal {
    container_id: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    scrollback: Arc<Mutex<VecDeque<String>>>,
    last_updated: Arc<AtomicI64>,
    _child: Mutex<Child>,
}

pub struct LocalTerminalStore {
    shell: String,
    working_dir: Option<PathBuf>,
    terminals: RwLock<HashMap<String, Arc<LocalTerminal>>>,
}

impl Default for LocalTerminalStore {
    fn default() -> Self {
        Self::new("sh", None)
    }
}

impl LocalTerminalStore {
    pub fn new(shell: impl Into<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            working_dir,
            terminals: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a new shell in `container_id` and returns its full id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self, container_id: &str) -> Result<String, PwnaiError> {
        let mut command = Command::new(&self.shell);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| PwnaiError::execution(format!("failed to spawn {}: {}", self.shell, e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PwnaiError::execution("shell stdin unavailable"))?;

        let scrollback = Arc::new(Mutex::new(VecDeque::new()));
        let last_updated = Arc::new(AtomicI64::new(0));
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, scrollback.clone(), last_updated.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, scrollback.clone(), last_updated.clone());
        }

        let id = Uuid::new_v4().to_string();
        debug!(terminal_id = %id, shell = %self.shell, "Opened local terminal");
        let terminal = Arc::new(LocalTerminal {
            container_id: container_id.to_string(),
            stdin: tokio::sync::Mutex::new(stdin),
            scrollback,
            last_updated,
            _child: Mutex::new(child),
        });
        self.terminals
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), terminal);
        Ok(id)
    }

    fn terminal(&self, full_id: &str) -> Result<Arc<LocalTerminal>, PwnaiError> {
        self.terminals
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(full_id)
            .cloned()
            .ok_or_else(|| PwnaiError::not_found(format!("terminal '{}'", full_id)))
    }
}

fn spawn_reader<R>(reader: R, scrollback: Arc<Mutex<VecDeque<String>>>, last_updated: Arc<AtomicI64>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let mut buf = scrollback.lock().unwrap_or_else(|e| e.into_inner());
                    push_line(&mut buf, line, MAX_SCROLLBACK_LINES);
                    last_updated.store(now_millis(), Ordering::Relaxed);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Terminal output stream failed");
                    break;
                }
            }
        }
    });
}

/// Appends `line`, dropping the oldest lines beyond `cap`.
fn push_line(buf: &mut VecDeque<String>, line: String, cap: usize) {
    buf.push_back(line);
    while buf.len() > cap {
        buf.pop_front();
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl TerminalStore for LocalTerminalStore {
    async fn resolve_id_from_prefix(
        &self,
        container_id: &str,
        short_id: &str,
        _timeout: Duration,
    ) -> Result<String, PwnaiError> {
        let terminals = self.terminals.read().unwrap_or_else(|e| e.into_inner());
        let matches: Vec<&String> = terminals
            .iter()
            .filter(|(id, t)| t.container_id == container_id && id.starts_with(short_id))
            .map(|(id, _)| id)
            .collect();
        match matches.as_slice() {
            [id] => Ok((*id).clone()),
            [] => Err(PwnaiError::not_found(format!("widget '{}'", short_id))),
            _ => Err(PwnaiError::invalid_input(format!(
                "widget id '{}' is ambiguous",
                short_id
            ))),
        }
    }

    async fn get_scrollback_lines(
        &self,
        full_id: &str,
        request: ScrollbackRequest,
    ) -> Result<ScrollbackLines, PwnaiError> {
        if request.last_command {
            return Err(PwnaiError::execution(
                "local terminals do not track command boundaries",
            ));
        }
        let terminal = self.terminal(full_id)?;
        let buf = terminal.scrollback.lock().unwrap_or_else(|e| e.into_inner());
        Ok(ScrollbackLines {
            lines: slice_recent(buf.iter(), request.line_start, request.line_end),
            total_lines: buf.len() as u64,
            line_start: request.line_start,
            last_updated: terminal.last_updated.load(Ordering::Relaxed),
        })
    }

    async fn send_input(&self, full_id: &str, data: &[u8]) -> Result<(), PwnaiError> {
        let terminal = self.terminal(full_id)?;
        let mut stdin = terminal.stdin.lock().await;
        stdin
            .write_all(data)
            .await
            .map_err(|e| PwnaiError::execution(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| PwnaiError::execution(e.to_string()))
    }

    async fn get_runtime_info(&self, full_id: &str) -> Option<RuntimeInfo> {
        self.terminal(full_id).ok().map(|_| RuntimeInfo::default())
    }
}

// pwnai-core/src/tools/fs.rs

//! `read_dir`: single-level directory listing.

use super::Tool;
use super::schema::saturating_u64;
use crate::errors::PwnaiError;
use crate::models::tools::{ToolSpec, ToolUseContext, object_schema};
use crate::utils::expand_home_dir;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ENTRIES: u64 = 500;
pub const HARD_MAX_ENTRIES: u64 = 10_000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub path: String,
    pub absolute_path: String,
    pub entry_count: usize,
    pub total_entries: usize,
    pub entries: Vec<FileInfo>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_dir: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReadDirInput {
    pub path: String,
    #[serde(default = "default_max_entries", deserialize_with = "saturating_u64")]
    pub max_entries: u64,
}

fn default_max_entries() -> u64 {
    DEFAULT_MAX_ENTRIES
}

fn resolve_dir(path: &str) -> Result<PathBuf, PwnaiError> {
    let expanded = expand_home_dir(path)?;
    if !expanded.is_absolute() {
        return Err(PwnaiError::verification(format!(
            "path must be absolute, got relative path: {}",
            path
        )));
    }
    Ok(expanded)
}

fn describe_entry(entry: &fs::DirEntry) -> Option<FileInfo> {
    let file_type = match entry.file_type() {
        Ok(ft) => ft,
        Err(e) => {
            warn!(entry = ?entry.path(), error = %e, "Error reading directory entry type");
            return None;
        }
    };
    let kind = if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_dir() {
        "directory"
    } else if file_type.is_file() {
        "file"
    } else {
        "unknown"
    };

    let metadata = entry.metadata().ok();
    let size = metadata
        .as_ref()
        .filter(|m| m.is_file())
        .map(|m| m.len());
    let modified = metadata
        .as_ref()
        .and_then(|m| m.modified().ok())
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs());

    Some(FileInfo {
        name: entry.file_name().to_string_lossy().into_owned(),
        file_type: kind.to_string(),
        size,
        modified,
        mode: metadata.as_ref().and_then(permission_bits),
    })
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:04o}", metadata.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &fs::Metadata) -> Option<String> {
    None
}

/// Lists one directory level, directories first, then by name.
pub fn list_directory(path: &str, dir: &Path, max_entries: usize) -> Result<DirListing, PwnaiError> {
    let read = fs::read_dir(dir)
        .map_err(|e| PwnaiError::execution(format!("failed to read directory: {}", e)))?;

    let mut entries: Vec<FileInfo> = read
        .filter_map(|entry| match entry {
            Ok(entry) => describe_entry(&entry),
            Err(e) => {
                warn!(error = %e, "Error reading directory entry");
                None
            }
        })
        .collect();
    entries.sort_by(|a, b| {
        let a_dir = a.file_type == "directory";
        let b_dir = b.file_type == "directory";
        b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
    });

    let total_entries = entries.len();
    let truncated = total_entries > max_entries;
    entries.truncate(max_entries);
    let entry_count = entries.len();

    let absolute = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    debug!(path = %absolute.display(), entry_count, total_entries, "Listed directory");

    Ok(DirListing {
        path: path.to_string(),
        absolute_path: absolute.to_string_lossy().into_owned(),
        entry_count,
        total_entries,
        entries,
        truncated,
        truncated_message: truncated.then(|| {
            format!(
                "Directory listing truncated to {} entries (out of {} total). Increase max_entries to see more.",
                entry_count, total_entries
            )
        }),
        parent_dir: absolute
            .parent()
            .map(|p| p.to_string_lossy().into_owned()),
    })
}

pub struct ReadDirTool;

#[async_trait]
impl Tool for ReadDirTool {
    type Input = ReadDirInput;
    type Output = DirListing;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_dir".to_string(),
            display_name: "Read Directory".to_string(),
            description: "Read a directory from the filesystem and list its contents. Returns information about files and subdirectories including names, types, sizes, permissions, and modification times.".to_string(),
            log_name: "gen:readdir".to_string(),
            input_schema: object_schema(
                vec![
                    (
                        "path",
                        json!({
                            "type": "string",
                            "minLength": 1,
                            "description": "Absolute path to the directory to read. Supports '~' for the user's home directory. Relative paths are not supported."
                        }),
                    ),
                    (
                        "max_entries",
                        json!({
                            "type": "integer",
                            "minimum": 1,
                            "maximum": HARD_MAX_ENTRIES,
                            "default": DEFAULT_MAX_ENTRIES,
                            "description": "Maximum number of entries to return. Defaults to 500, max 10000."
                        }),
                    ),
                ],
                &["path"],
            ),
            strict: false,
        }
    }

    fn describe(&self, input: &ReadDirInput, output: Option<&DirListing>) -> String {
        match output {
            Some(listing) if !listing.truncated => {
                format!("reading directory {:?} (entire directory)", input.path)
            }
            _ => format!(
                "reading directory {:?} (max entries: {})",
                input.path, input.max_entries
            ),
        }
    }

    fn approval(&self, input: &ReadDirInput) -> Option<String> {
        Some(format!("Read directory {}", input.path))
    }

    fn verify(&self, input: &ReadDirInput) -> Result<(), PwnaiError> {
        let dir = resolve_dir(&input.path)?;
        let metadata = fs::metadata(&dir)
            .map_err(|e| PwnaiError::verification(format!("could not stat path: {}", e)))?;
        if !metadata.is_dir() {
            return Err(PwnaiError::verification(
                "path is not a directory and cannot be read with read_dir; use a file reading tool instead",
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        input: &ReadDirInput,
        _ctx: &ToolUseContext,
    ) -> Result<DirListing, PwnaiError> {
        let dir = resolve_dir(&input.path)?;
        list_directory(&input.path, &dir, input.max_entries as usize)
    }
}

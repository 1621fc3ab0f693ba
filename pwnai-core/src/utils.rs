// pwnai-core/src/utils.rs
//! General utility functions.

use crate::errors::PwnaiError;
use std::path::PathBuf;

/// Expands a leading `~` to the user's home directory.
pub fn expand_home_dir(path: &str) -> Result<PathBuf, PwnaiError> {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| PwnaiError::verification("could not determine home directory"))?;
        return Ok(match path.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => home,
        });
    }
    Ok(PathBuf::from(path))
}

/// Shortens `input` to at most `max_chars` characters, ending in "..." when cut.
/// Limits below 3 cut without the ellipsis.
pub fn truncate_string(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    if max_chars < 3 {
        return input.chars().take(max_chars).collect();
    }
    let kept: String = input.chars().take(max_chars - 3).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("sysinfo", 10), "sysinfo");
        assert_eq!(truncate_string("run post/multi/recon", 10), "run pos...");
        assert_eq!(truncate_string("hashdump", 3), "...");
        assert_eq!(truncate_string("hashdump", 2), "ha");
        assert_eq!(truncate_string("", 0), "");
        assert_eq!(truncate_string("привет мир", 4), "п...");
    }

    #[test]
    fn test_expand_home_dir() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home_dir("~").unwrap(), home);
        assert_eq!(expand_home_dir("~/loot").unwrap(), home.join("loot"));
        assert_eq!(expand_home_dir("/etc").unwrap(), PathBuf::from("/etc"));
        assert_eq!(expand_home_dir("~other").unwrap(), PathBuf::from("~other"));
    }
}

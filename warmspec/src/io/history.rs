//! Append-only command history (one line per successful interactive run).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Append `line` to the history file, creating it if needed.
pub fn append_history(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open history {}", path.display()))?;
    writeln!(file, "{}", line.trim_end()).with_context(|| format!("append history {}", path.display()))
}

/// All recorded lines, oldest first. A missing file is empty history.
pub fn read_history(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read history {}", path.display()))?;
    Ok(contents.lines().map(str::to_string).collect())
}

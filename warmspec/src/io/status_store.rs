//! Per-example status persistence (`persistence_path`).

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleStatus {
    Passed,
    Failed,
}

/// Last known status of every example ever run, by example id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTable {
    pub examples: BTreeMap<String, ExampleStatus>,
}

impl StatusTable {
    pub fn failed_ids(&self) -> HashSet<String> {
        self.examples
            .iter()
            .filter(|(_, status)| **status == ExampleStatus::Failed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn merge(&mut self, statuses: &[(String, bool)]) {
        for (id, passed) in statuses {
            let status = if *passed {
                ExampleStatus::Passed
            } else {
                ExampleStatus::Failed
            };
            self.examples.insert(id.clone(), status);
        }
    }
}

/// Load the table. A missing file is an empty table.
pub fn load_statuses(path: &Path) -> Result<StatusTable> {
    if !path.exists() {
        return Ok(StatusTable::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read statuses {}", path.display()))?;
    let table = serde_json::from_str(&contents)
        .with_context(|| format!("parse statuses {}", path.display()))?;
    Ok(table)
}

/// Merge `statuses` into the table on disk (temp file + rename).
pub fn persist_statuses(path: &Path, statuses: &[(String, bool)]) -> Result<()> {
    let mut table = load_statuses(path)?;
    table.merge(statuses);
    debug!(path = %path.display(), examples = table.examples.len(), "persisting example statuses");
    let mut buf = serde_json::to_string_pretty(&table).context("serialize statuses")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp statuses {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace statuses {}", path.display()))?;
    Ok(())
}

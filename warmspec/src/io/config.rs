//! Console profiles stored in `.warmspec.toml`.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::snapshot::DEFAULT_REPLAY_EXCLUSIONS;
use crate::suite::config::ConfigOpKind;

pub const CONFIG_FILE: &str = ".warmspec.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStrategy {
    /// Diff `{path, mtime}` snapshots on every refresh.
    #[default]
    Poll,
    /// Filesystem notifications collected in the background.
    Notify,
}

/// One named console profile.
///
/// Relative paths are resolved against the project root. Missing fields
/// default to values that work for a `spec/` directory of `.ws` suites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Profile {
    pub name: String,

    /// Directories whose source files are reloaded when they change.
    pub watch_dirs: Vec<PathBuf>,

    /// Suite file loaded once at startup; its `config` lines become the
    /// configuration snapshot.
    pub init_script: Option<PathBuf>,

    /// File extensions (without dot) the watcher tracks.
    pub extensions: Vec<String>,

    pub watch_strategy: WatchStrategy,

    /// Backend polling interval for the notify strategy.
    pub poll_interval_ms: u64,

    /// Remote command server port. The server is disabled when absent.
    pub server_port: Option<u16>,

    /// Configuration op kinds never re-applied on replay.
    pub replay_exclusions: Vec<ConfigOpKind>,

    /// Append-only log of successful interactive run commands.
    pub history_path: PathBuf,

    /// Example status file, used when the init script sets none.
    pub results_path: PathBuf,

    /// Number of run results kept for the `results` command.
    pub results_retained: usize,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            watch_dirs: vec![PathBuf::from("spec")],
            init_script: None,
            extensions: vec!["ws".to_string()],
            watch_strategy: WatchStrategy::Poll,
            poll_interval_ms: 500,
            server_port: None,
            replay_exclusions: DEFAULT_REPLAY_EXCLUSIONS.to_vec(),
            history_path: PathBuf::from(".warmspec_history"),
            results_path: PathBuf::from(".warmspec_results"),
            results_retained: 10,
        }
    }
}

impl Profile {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("profile name must be non-empty"));
        }
        if self.extensions.is_empty() || self.extensions.iter().any(|ext| ext.trim().is_empty()) {
            return Err(anyhow!(
                "profile `{}`: extensions must be a non-empty array of non-empty strings",
                self.name
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("profile `{}`: poll_interval_ms must be > 0", self.name));
        }
        if self.results_retained == 0 {
            return Err(anyhow!("profile `{}`: results_retained must be > 0", self.name));
        }
        Ok(())
    }

    /// `path` joined onto `root` unless already absolute.
    pub fn resolve(root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        }
    }
}

/// Contents of `.warmspec.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub configs: Vec<Profile>,
}

impl ConsoleConfig {
    pub fn validate(&self) -> Result<()> {
        for (index, profile) in self.configs.iter().enumerate() {
            profile.validate()?;
            if self.configs[..index].iter().any(|p| p.name == profile.name) {
                return Err(anyhow!("duplicate profile name `{}`", profile.name));
            }
        }
        Ok(())
    }
}

/// Load the profile file. `None` when it does not exist.
pub fn load_config(path: &Path) -> Result<Option<ConsoleConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConsoleConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    debug!(path = %path.display(), profiles = cfg.configs.len(), "loaded console config");
    Ok(Some(cfg))
}

/// Pick the profile to run with.
///
/// `choose` is asked only when several profiles exist and none was named;
/// it returns an index into the slice it is given.
pub fn select_profile<F>(
    loaded: Option<ConsoleConfig>,
    name: Option<&str>,
    choose: F,
) -> Result<Profile>
where
    F: FnOnce(&[Profile]) -> Result<usize>,
{
    let Some(cfg) = loaded else {
        warn!("no {CONFIG_FILE} found, using the default profile");
        if let Some(name) = name
            && name != "default"
        {
            bail!("profile `{name}` not found: no {CONFIG_FILE}");
        }
        return Ok(Profile::default());
    };

    let mut profiles = cfg.configs;
    if profiles.is_empty() {
        bail!("{CONFIG_FILE} defines no profiles");
    }
    if let Some(name) = name {
        return profiles
            .into_iter()
            .find(|profile| profile.name == name)
            .with_context(|| format!("profile `{name}` not found in {CONFIG_FILE}"));
    }
    if profiles.len() == 1 {
        return Ok(profiles.remove(0));
    }
    let index = choose(&profiles)?;
    if index >= profiles.len() {
        bail!("profile choice {} out of range", index + 1);
    }
    Ok(profiles.swap_remove(index))
}

/// Numbered menu on `output`, answer read from `input`. An empty answer
/// picks the first profile; an invalid one asks again.
pub fn prompt_for_profile(
    input: &mut impl BufRead,
    output: &mut impl Write,
    profiles: &[Profile],
) -> Result<usize> {
    loop {
        writeln!(output, "Select a configuration:")?;
        for (index, profile) in profiles.iter().enumerate() {
            let default = if index == 0 { " (default)" } else { "" };
            writeln!(output, "  {}) {}{default}", index + 1, profile.name)?;
        }
        write!(output, "> ")?;
        output.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer).context("read profile choice")? == 0 {
            bail!("no configuration chosen");
        }
        match parse_choice(answer.trim(), profiles) {
            Some(index) => return Ok(index),
            None => writeln!(output, "invalid config: {}", answer.trim())?,
        }
    }
}

fn parse_choice(answer: &str, profiles: &[Profile]) -> Option<usize> {
    if answer.is_empty() {
        return Some(0);
    }
    if let Some(index) = profiles.iter().position(|profile| profile.name == answer) {
        return Some(index);
    }
    match answer.parse::<usize>() {
        Ok(number) if (1..=profiles.len()).contains(&number) => Some(number - 1),
        _ => None,
    }
}

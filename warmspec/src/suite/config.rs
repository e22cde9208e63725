//! Suite configuration and its declared mutation surface.
//!
//! All mutation goes through [`ConfigOp`] values applied via [`Configure`],
//! which is what lets the snapshot cache log and replay them.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exit_codes;
use crate::io::output::{SharedSink, SinkSlot};

pub const DEFAULT_PATTERN: &str = "spec/**/*_spec.ws";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formatter {
    #[default]
    Progress,
    Documentation,
}

/// One configuration mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOp {
    SetFormatter(Formatter),
    SetPersistencePath(PathBuf),
    SetFailureExitCode(i32),
    SetFailIfNoExamples(bool),
    SetFailFast(bool),
    SetDefaultPattern(String),
    /// Bind the reporter to whatever output stream is current right now.
    CacheReporter,
}

/// Discriminant of [`ConfigOp`], used for replay exclusion lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOpKind {
    SetFormatter,
    SetPersistencePath,
    SetFailureExitCode,
    SetFailIfNoExamples,
    SetFailFast,
    SetDefaultPattern,
    CacheReporter,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown configuration directive `{0}`")]
    UnknownDirective(String),
    #[error("configuration directive `{directive}` expects {expected}")]
    InvalidArgument {
        directive: String,
        expected: &'static str,
    },
    #[error("failure exit code must be non-zero")]
    ZeroExitCode,
    #[error("default pattern must not be empty")]
    EmptyPattern,
    #[error("{0}")]
    Abort(String),
}

impl ConfigOp {
    pub fn kind(&self) -> ConfigOpKind {
        match self {
            ConfigOp::SetFormatter(_) => ConfigOpKind::SetFormatter,
            ConfigOp::SetPersistencePath(_) => ConfigOpKind::SetPersistencePath,
            ConfigOp::SetFailureExitCode(_) => ConfigOpKind::SetFailureExitCode,
            ConfigOp::SetFailIfNoExamples(_) => ConfigOpKind::SetFailIfNoExamples,
            ConfigOp::SetFailFast(_) => ConfigOpKind::SetFailFast,
            ConfigOp::SetDefaultPattern(_) => ConfigOpKind::SetDefaultPattern,
            ConfigOp::CacheReporter => ConfigOpKind::CacheReporter,
        }
    }

    /// Parse a `config <directive> [arg]` line body.
    pub fn parse(directive: &str, arg: Option<&str>) -> Result<ConfigOp, ConfigError> {
        let invalid = |expected| ConfigError::InvalidArgument {
            directive: directive.to_string(),
            expected,
        };
        let arg = arg.map(str::trim).filter(|a| !a.is_empty());
        match directive {
            "formatter" => {
                let value = arg.ok_or_else(|| invalid("progress or documentation"))?;
                Formatter::from_str(value, true)
                    .map(ConfigOp::SetFormatter)
                    .map_err(|_| invalid("progress or documentation"))
            }
            "persistence_path" => arg
                .map(|path| ConfigOp::SetPersistencePath(PathBuf::from(path)))
                .ok_or_else(|| invalid("a path")),
            "failure_exit_code" => arg
                .and_then(|code| code.parse().ok())
                .map(ConfigOp::SetFailureExitCode)
                .ok_or_else(|| invalid("an integer")),
            "fail_if_no_examples" => parse_flag(arg)
                .map(ConfigOp::SetFailIfNoExamples)
                .ok_or_else(|| invalid("true or false")),
            "fail_fast" => parse_flag(arg)
                .map(ConfigOp::SetFailFast)
                .ok_or_else(|| invalid("true or false")),
            "default_pattern" => arg
                .map(|pattern| ConfigOp::SetDefaultPattern(pattern.to_string()))
                .ok_or_else(|| invalid("a glob")),
            "reporter" => match arg {
                None => Ok(ConfigOp::CacheReporter),
                Some(_) => Err(invalid("no argument")),
            },
            other => Err(ConfigError::UnknownDirective(other.to_string())),
        }
    }
}

/// A missing flag argument means `true`.
fn parse_flag(arg: Option<&str>) -> Option<bool> {
    match arg {
        None | Some("true") => Some(true),
        Some("false") => Some(false),
        Some(_) => None,
    }
}

impl fmt::Display for ConfigOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOp::SetFormatter(formatter) => write!(f, "formatter {formatter:?}"),
            ConfigOp::SetPersistencePath(path) => write!(f, "persistence_path {}", path.display()),
            ConfigOp::SetFailureExitCode(code) => write!(f, "failure_exit_code {code}"),
            ConfigOp::SetFailIfNoExamples(flag) => write!(f, "fail_if_no_examples {flag}"),
            ConfigOp::SetFailFast(flag) => write!(f, "fail_fast {flag}"),
            ConfigOp::SetDefaultPattern(pattern) => write!(f, "default_pattern {pattern}"),
            ConfigOp::CacheReporter => write!(f, "reporter"),
        }
    }
}

/// Target of configuration mutations.
pub trait Configure {
    /// Return to the unconfigured baseline.
    fn reset(&mut self);

    fn apply(&mut self, op: &ConfigOp) -> Result<(), ConfigError>;
}

/// Live suite configuration.
pub struct Configuration {
    pub formatter: Formatter,
    pub persistence_path: Option<PathBuf>,
    pub failure_exit_code: i32,
    pub fail_if_no_examples: bool,
    pub fail_fast: bool,
    pub default_pattern: String,
    output_stream: Arc<SinkSlot>,
    default_output: SharedSink,
    cached_reporter: Option<SharedSink>,
}

impl Configuration {
    pub fn new(default_output: SharedSink) -> Self {
        Self {
            formatter: Formatter::default(),
            persistence_path: None,
            failure_exit_code: exit_codes::INFRASTRUCTURE_FAILURE,
            fail_if_no_examples: false,
            fail_fast: false,
            default_pattern: DEFAULT_PATTERN.to_string(),
            output_stream: Arc::new(SinkSlot::new(default_output.clone())),
            default_output,
            cached_reporter: None,
        }
    }

    /// The rebindable stream runs write to.
    pub fn output_stream(&self) -> &Arc<SinkSlot> {
        &self.output_stream
    }

    /// Where the reporter writes: the cached binding if one was made,
    /// otherwise the output stream itself (following substitutions).
    pub fn reporter_sink(&self) -> SharedSink {
        match &self.cached_reporter {
            Some(sink) => sink.clone(),
            None => self.output_stream.clone() as SharedSink,
        }
    }

    pub fn has_cached_reporter(&self) -> bool {
        self.cached_reporter.is_some()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("formatter", &self.formatter)
            .field("persistence_path", &self.persistence_path)
            .field("failure_exit_code", &self.failure_exit_code)
            .field("fail_if_no_examples", &self.fail_if_no_examples)
            .field("fail_fast", &self.fail_fast)
            .field("default_pattern", &self.default_pattern)
            .field("cached_reporter", &self.cached_reporter.is_some())
            .finish()
    }
}

impl Configure for Configuration {
    fn reset(&mut self) {
        *self = Configuration::new(self.default_output.clone());
    }

    fn apply(&mut self, op: &ConfigOp) -> Result<(), ConfigError> {
        match op {
            ConfigOp::SetFormatter(formatter) => self.formatter = *formatter,
            ConfigOp::SetPersistencePath(path) => self.persistence_path = Some(path.clone()),
            ConfigOp::SetFailureExitCode(0) => return Err(ConfigError::ZeroExitCode),
            ConfigOp::SetFailureExitCode(code) => self.failure_exit_code = *code,
            ConfigOp::SetFailIfNoExamples(flag) => self.fail_if_no_examples = *flag,
            ConfigOp::SetFailFast(flag) => self.fail_fast = *flag,
            ConfigOp::SetDefaultPattern(pattern) if pattern.trim().is_empty() => {
                return Err(ConfigError::EmptyPattern);
            }
            ConfigOp::SetDefaultPattern(pattern) => self.default_pattern = pattern.clone(),
            ConfigOp::CacheReporter => {
                self.cached_reporter = Some(self.output_stream.current());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::output::{BufferSink, NullSink, Sink};

    #[test]
    fn parse_directives() {
        assert_eq!(
            ConfigOp::parse("formatter", Some("documentation")),
            Ok(ConfigOp::SetFormatter(Formatter::Documentation))
        );
        assert_eq!(
            ConfigOp::parse("fail_fast", None),
            Ok(ConfigOp::SetFailFast(true))
        );
        assert_eq!(
            ConfigOp::parse("reporter", None),
            Ok(ConfigOp::CacheReporter)
        );
        assert_eq!(
            ConfigOp::parse("colour", Some("on")),
            Err(ConfigError::UnknownDirective("colour".to_string()))
        );
        assert!(matches!(
            ConfigOp::parse("failure_exit_code", Some("x")),
            Err(ConfigError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn apply_rejects_invalid_values() {
        let mut config = Configuration::new(Arc::new(NullSink));
        assert_eq!(
            config.apply(&ConfigOp::SetFailureExitCode(0)),
            Err(ConfigError::ZeroExitCode)
        );
        assert_eq!(
            config.apply(&ConfigOp::SetDefaultPattern(" ".to_string())),
            Err(ConfigError::EmptyPattern)
        );
        assert_eq!(config.failure_exit_code, exit_codes::INFRASTRUCTURE_FAILURE);
    }

    #[test]
    fn reset_returns_to_baseline() {
        let mut config = Configuration::new(Arc::new(NullSink));
        config
            .apply(&ConfigOp::SetFormatter(Formatter::Documentation))
            .expect("apply");
        config.apply(&ConfigOp::CacheReporter).expect("apply");
        config.reset();
        assert_eq!(config.formatter, Formatter::Progress);
        assert!(!config.has_cached_reporter());
    }

    #[test]
    fn cached_reporter_ignores_later_substitution() {
        let first = Arc::new(BufferSink::new());
        let second = Arc::new(BufferSink::new());
        let mut config = Configuration::new(first.clone());
        config.apply(&ConfigOp::CacheReporter).expect("apply");

        let slot = config.output_stream().clone();
        let _guard = slot.substitute(second.clone());
        config.reporter_sink().print("report");

        assert_eq!(first.contents(), "report");
        assert_eq!(second.contents(), "");
    }

    #[test]
    fn uncached_reporter_follows_substitution() {
        let first = Arc::new(BufferSink::new());
        let second = Arc::new(BufferSink::new());
        let config = Configuration::new(first.clone());

        let slot = config.output_stream().clone();
        let _guard = slot.substitute(second.clone());
        config.reporter_sink().print("report");

        assert_eq!(first.contents(), "");
        assert_eq!(second.contents(), "report");
    }
}

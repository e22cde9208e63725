//! Command runner: one suite run, to completion or cooperative cancellation.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::cancel::CancelToken;
use crate::core::result::{GroupResult, RunResult};
use crate::io::output::SharedSink;
use crate::io::status_store::{load_statuses, persist_statuses};
use crate::snapshot::ReplayError;
use crate::suite::config::{ConfigError, Configuration};
use crate::suite::example::{ExampleStatuses, run_group};
use crate::suite::options::{ExampleFilter, RunOptions, resolve_files};
use crate::suite::reporter::Reporter;
use crate::suite::world::{LoadError, World};

/// Errors a run reports to its caller instead of in its own output.
#[derive(Debug, Error)]
pub enum RunError {
    /// Bad arguments, `--help`, or an option the configuration refused.
    #[error("{0}")]
    Options(String),
    /// A changed source file failed to reload before the run started.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// The configuration snapshot could not be re-applied after the run.
    #[error("could not restore configuration: {0}")]
    Replay(#[from] ReplayError),
}

impl From<clap::Error> for RunError {
    fn from(err: clap::Error) -> Self {
        RunError::Options(err.to_string())
    }
}

impl From<ConfigError> for RunError {
    fn from(err: ConfigError) -> Self {
        RunError::Options(err.to_string())
    }
}

/// Everything a run touches. The caller holds the execution lock.
pub struct RunContext<'a> {
    pub root: &'a Path,
    pub config: &'a mut Configuration,
    pub world: &'a mut World,
    /// Destination for this run's report.
    pub out: SharedSink,
}

#[derive(Debug)]
pub struct Runner {
    options: RunOptions,
    cancel: CancelToken,
}

impl Runner {
    /// Parse run arguments (globs already expanded by the caller).
    pub fn new(args: &[String]) -> Result<Self, RunError> {
        let options = RunOptions::parse_args(args)?;
        Ok(Self {
            options,
            cancel: CancelToken::new(),
        })
    }

    /// Observe `token` instead of a fresh one.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Handle for cancelling this run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop after the group currently executing.
    pub fn request_quit(&self) {
        self.cancel.cancel();
    }

    /// Run the selected suites against an already replayed configuration.
    ///
    /// Load errors are part of the result; only option errors are `Err`.
    pub fn run(&self, ctx: RunContext<'_>) -> Result<RunResult, RunError> {
        let RunContext {
            root,
            config,
            world,
            out,
        } = ctx;

        let stream = Arc::clone(config.output_stream());
        let _substituted = stream.substitute(out);

        self.options.apply(config)?;
        let files = resolve_files(root, &self.options.targets(), &config.default_pattern)?;
        debug!(files = files.len(), "resolved suite files");

        for file in &files {
            if let Err(err) = world.load_suite(&file.path, &file.display, config) {
                warn!(file = %file.display, error = %err, "suite file failed to load");
                world.record_non_example_failure();
                let mut reporter = Reporter::new(config.reporter_sink(), config.formatter);
                reporter.load_error(&file.display, &err);
                reporter.finish(0);
                return Ok(RunResult::infrastructure(config.failure_exit_code));
            }
        }

        let mut reporter = Reporter::new(config.reporter_sink(), config.formatter);
        let mut filter = ExampleFilter::new(&files, &self.options.example);
        if self.options.only_failures()
            && let Some(path) = &config.persistence_path
        {
            let path = root.join(path);
            match load_statuses(&path) {
                Ok(table) => filter = filter.only(table.failed_ids()),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "could not read example statuses");
                    reporter.warning(&format!("{err:#}"));
                    filter = filter.only(Default::default());
                }
            }
        }
        let groups = filter.apply(world.groups());
        let example_count: usize = groups.iter().map(|group| group.examples.len()).sum();
        debug!(groups = groups.len(), examples = example_count, "running");

        if example_count == 0 && config.fail_if_no_examples {
            reporter.finish(0);
            return Ok(RunResult::from_groups(
                Vec::new(),
                0,
                Some(config.failure_exit_code),
            ));
        }

        let mut statuses = ExampleStatuses::new();
        let mut results: Vec<GroupResult> = Vec::with_capacity(groups.len());
        for group in &groups {
            if self.cancel.is_cancelled() {
                debug!(ran = results.len(), total = groups.len(), "run cancelled");
                reporter.cancelled(results.len(), groups.len());
                self.persist(root, config, &statuses, &mut reporter);
                return Ok(RunResult::cancelled(results, example_count));
            }
            let result = run_group(group, &mut reporter, config.fail_fast, &mut statuses);
            let stop = config.fail_fast && !result.success;
            results.push(result);
            if stop {
                break;
            }
        }

        reporter.finish(example_count);
        self.persist(root, config, &statuses, &mut reporter);

        let infrastructure = world
            .non_example_failure()
            .then_some(config.failure_exit_code);
        Ok(RunResult::from_groups(results, example_count, infrastructure))
    }

    /// Write statuses to the results store. Failure is only a warning.
    fn persist(
        &self,
        root: &Path,
        config: &Configuration,
        statuses: &ExampleStatuses,
        reporter: &mut Reporter,
    ) {
        let Some(path) = &config.persistence_path else {
            return;
        };
        if statuses.is_empty() {
            return;
        }
        if let Err(err) = persist_statuses(&root.join(path), statuses) {
            warn!(error = %format!("{err:#}"), "could not persist example statuses");
            reporter.warning(&format!("could not persist example statuses: {err:#}"));
        }
    }
}

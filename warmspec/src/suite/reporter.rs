//! Human-readable run report.

use std::fmt::Display;
use std::time::Instant;

use crate::io::output::SharedSink;
use crate::suite::config::Formatter;
use crate::suite::example::{ExampleOutcome, Failure};
use crate::suite::world::{Example, ExampleGroup};

struct FailureNote {
    full_description: String,
    location: String,
    failure: Failure,
}

/// Formats one run's progress and summary to a sink.
pub struct Reporter {
    out: SharedSink,
    formatter: Formatter,
    failures: Vec<FailureNote>,
    examples_run: usize,
    errors_outside_examples: usize,
    pending_newline: bool,
    started: Instant,
}

impl Reporter {
    pub fn new(out: SharedSink, formatter: Formatter) -> Self {
        Self {
            out,
            formatter,
            failures: Vec::new(),
            examples_run: 0,
            errors_outside_examples: 0,
            pending_newline: false,
            started: Instant::now(),
        }
    }

    pub fn out(&self) -> &SharedSink {
        &self.out
    }

    pub fn examples_run(&self) -> usize {
        self.examples_run
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn group_started(&mut self, group: &ExampleGroup) {
        if self.formatter == Formatter::Documentation {
            self.out.writeln("");
            self.out.writeln(&group.description);
        }
    }

    pub fn example_finished(&mut self, example: &Example, outcome: &ExampleOutcome) {
        self.examples_run += 1;
        match outcome {
            ExampleOutcome::Passed => match self.formatter {
                Formatter::Progress => self.progress("."),
                Formatter::Documentation => {
                    self.out.writeln(&format!("  {}", example.description));
                }
            },
            ExampleOutcome::Failed(failure) => {
                self.failures.push(FailureNote {
                    full_description: example.full_description.clone(),
                    location: example.location.clone(),
                    failure: failure.clone(),
                });
                match self.formatter {
                    Formatter::Progress => self.progress("F"),
                    Formatter::Documentation => self.out.writeln(&format!(
                        "  {} (FAILED - {})",
                        example.description,
                        self.failures.len()
                    )),
                }
            }
        }
        self.out.flush();
    }

    /// Report a failure outside of any example (e.g. a file that will not load).
    pub fn load_error(&mut self, file: &str, err: &dyn Display) {
        self.errors_outside_examples += 1;
        self.end_progress_line();
        self.out
            .writeln(&format!("An error occurred while loading {file}."));
        self.out.writeln(&err.to_string());
        self.out.writeln("");
    }

    pub fn warning(&mut self, message: &str) {
        self.end_progress_line();
        self.out.writeln(&format!("warning: {message}"));
    }

    pub fn cancelled(&mut self, groups_run: usize, groups_total: usize) {
        self.end_progress_line();
        self.out.writeln("");
        self.out.writeln(&format!(
            "Run cancelled after {groups_run} of {groups_total} groups."
        ));
    }

    /// Print failures and the summary lines.
    pub fn finish(&mut self, example_count: usize) {
        self.end_progress_line();
        self.out.writeln("");

        if !self.failures.is_empty() {
            self.out.writeln("Failures:");
            self.out.writeln("");
            for (index, note) in self.failures.iter().enumerate() {
                self.out
                    .writeln(&format!("  {}) {}", index + 1, note.full_description));
                self.out.writeln(&format!(
                    "     Failure/Error: {}",
                    note.failure.source
                ));
                self.out.writeln("");
                for line in note.failure.message.lines() {
                    self.out.writeln(&format!("       {line}"));
                }
                self.out.writeln(&format!("     # {}", note.failure.location));
                self.out.writeln("");
            }
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        self.out.writeln(&format!("Finished in {elapsed:.5} seconds"));
        let mut summary = format!(
            "{}, {}",
            pluralize(example_count, "example"),
            pluralize(self.failures.len(), "failure")
        );
        if self.errors_outside_examples > 0 {
            summary.push_str(&format!(
                ", {} occurred outside of examples",
                pluralize(self.errors_outside_examples, "error")
            ));
        }
        self.out.writeln(&summary);

        if !self.failures.is_empty() {
            self.out.writeln("");
            self.out.writeln("Failed examples:");
            self.out.writeln("");
            for note in &self.failures {
                self.out.writeln(&format!(
                    "warmspec {} # {}",
                    note.location, note.full_description
                ));
            }
        }
        self.out.flush();
    }

    fn progress(&mut self, mark: &str) {
        self.out.print(mark);
        self.pending_newline = true;
    }

    fn end_progress_line(&mut self) {
        if self.pending_newline {
            self.out.writeln("");
            self.pending_newline = false;
        }
    }
}

fn pluralize(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

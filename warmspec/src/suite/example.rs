//! Example and group execution.

use std::thread;

use tracing::debug;

use crate::core::result::GroupResult;
use crate::io::output::Sink;
use crate::suite::parse::{Matcher, StepKind};
use crate::suite::reporter::Reporter;
use crate::suite::world::{Example, ExampleGroup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Text of the failing step.
    pub source: String,
    pub message: String,
    /// `<file>:<line>` of the failing step.
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExampleOutcome {
    Passed,
    Failed(Failure),
}

impl ExampleOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ExampleOutcome::Passed)
    }
}

/// Run the steps of one example, stopping at the first failed expectation.
pub fn run_example(example: &Example, out: &dyn Sink) -> ExampleOutcome {
    for step in &example.steps {
        match &step.kind {
            StepKind::Puts(text) => out.writeln(text),
            StepKind::Sleep(duration) => thread::sleep(*duration),
            StepKind::Expect { actual, matcher } => {
                if let Some(message) = check(actual, matcher) {
                    return ExampleOutcome::Failed(Failure {
                        source: step.source.clone(),
                        message,
                        location: format!("{}:{}", example.origin, step.line),
                    });
                }
            }
        }
    }
    ExampleOutcome::Passed
}

/// `None` when the expectation holds, otherwise the failure message.
fn check(actual: &str, matcher: &Matcher) -> Option<String> {
    match matcher {
        Matcher::Eq(expected) if actual == expected => None,
        Matcher::Eq(expected) => Some(format!("expected: {expected}\n     got: {actual}")),
        Matcher::Ne(expected) if actual != expected => None,
        Matcher::Ne(expected) => Some(format!("expected: value != {expected}\n     got: {actual}")),
        Matcher::Matches(regex) if regex.is_match(actual) => None,
        Matcher::Matches(regex) => Some(format!("expected {actual:?} to match /{}/", regex.as_str())),
    }
}

/// Per-example outcome, keyed by example id, for the results store.
pub type ExampleStatuses = Vec<(String, bool)>;

/// Run every example of `group` in order.
///
/// With `fail_fast`, the group stops at its first failing example.
pub fn run_group(
    group: &ExampleGroup,
    reporter: &mut Reporter,
    fail_fast: bool,
    statuses: &mut ExampleStatuses,
) -> GroupResult {
    debug!(group = %group.description, examples = group.examples.len(), "running group");
    reporter.group_started(group);
    let out = reporter.out().clone();
    let mut examples = 0;
    let mut failures = 0;
    for example in &group.examples {
        let outcome = run_example(example, out.as_ref());
        examples += 1;
        statuses.push((example.id.clone(), outcome.passed()));
        reporter.example_finished(example, &outcome);
        if !outcome.passed() {
            failures += 1;
            if fail_fast {
                break;
            }
        }
    }
    GroupResult {
        description: group.description.clone(),
        location: group.location(),
        examples,
        failures,
        success: failures == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::output::BufferSink;
    use crate::suite::config::Formatter;
    use crate::suite::parse::Step;
    use regex::Regex;
    use std::sync::Arc;

    fn expect(actual: &str, matcher: Matcher, line: usize) -> Step {
        Step {
            line,
            source: format!("expect {actual} ..."),
            kind: StepKind::Expect {
                actual: actual.to_string(),
                matcher,
            },
        }
    }

    fn example(index: usize, steps: Vec<Step>) -> Example {
        Example {
            id: format!("./a_spec.ws[1:{index}]"),
            description: format!("example {index}"),
            full_description: format!("group example {index}"),
            origin: "./a_spec.ws".to_string(),
            location: format!("./a_spec.ws:{index}"),
            line: index,
            steps,
        }
    }

    #[test]
    fn matchers() {
        assert_eq!(check("a", &Matcher::Eq("a".to_string())), None);
        assert_eq!(
            check("true", &Matcher::Eq("false".to_string())),
            Some("expected: false\n     got: true".to_string())
        );
        assert_eq!(check("a", &Matcher::Ne("b".to_string())), None);
        assert!(check("a", &Matcher::Ne("a".to_string())).is_some());
        let digits = Regex::new(r"^\d+$").expect("regex");
        assert_eq!(check("123", &Matcher::Matches(digits.clone())), None);
        assert!(check("12x", &Matcher::Matches(digits)).is_some());
    }

    #[test]
    fn example_stops_at_first_failure() {
        let sink = BufferSink::new();
        let ex = example(
            1,
            vec![
                expect("1", Matcher::Eq("2".to_string()), 7),
                Step {
                    line: 8,
                    source: "puts unreachable".to_string(),
                    kind: StepKind::Puts("unreachable".to_string()),
                },
            ],
        );
        let ExampleOutcome::Failed(failure) = run_example(&ex, &sink) else {
            panic!("expected failure");
        };
        assert_eq!(failure.location, "./a_spec.ws:7");
        assert_eq!(sink.contents(), "");
    }

    #[test]
    fn fail_fast_stops_group() {
        let group = ExampleGroup {
            description: "group".to_string(),
            file: "./a_spec.ws".to_string(),
            line: 1,
            end_line: 3,
            examples: vec![
                example(1, vec![expect("x", Matcher::Eq("y".to_string()), 3)]),
                example(2, Vec::new()),
            ],
        };
        let sink = Arc::new(BufferSink::new());
        let mut reporter = Reporter::new(sink, Formatter::Progress);

        let mut statuses = Vec::new();
        let result = run_group(&group, &mut reporter, true, &mut statuses);
        assert!(!result.success);
        assert_eq!(result.examples, 1);
        assert_eq!(statuses, vec![("./a_spec.ws[1:1]".to_string(), false)]);

        let mut statuses = Vec::new();
        let result = run_group(&group, &mut reporter, false, &mut statuses);
        assert_eq!(result.examples, 2);
        assert_eq!(result.failures, 1);
    }
}

//! Run outcomes and the bounded history of recent results.

use std::collections::VecDeque;
use std::fmt;

use crate::exit_codes;

/// Outcome of one example group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupResult {
    pub description: String,
    pub location: String,
    pub examples: usize,
    pub failures: usize,
    pub success: bool,
}

/// Structured result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub success: bool,
    pub group_results: Vec<GroupResult>,
    pub exit_code: i32,
    /// Examples selected for the run, executed or not.
    pub example_count: usize,
    /// Stopped by its cancellation token. Independent of `exit_code`, which
    /// the configured failure code may also set to the early-exit value.
    pub cancelled: bool,
}

impl RunResult {
    /// Aggregate executed groups. `infrastructure_failure` carries the
    /// configured failure code when something failed outside an example.
    pub fn from_groups(
        group_results: Vec<GroupResult>,
        example_count: usize,
        infrastructure_failure: Option<i32>,
    ) -> Self {
        let groups_ok = group_results.iter().all(|group| group.success);
        let (success, exit_code) = match infrastructure_failure {
            Some(code) => (false, code),
            None if groups_ok => (true, exit_codes::OK),
            None => (false, exit_codes::FAILURE),
        };
        Self {
            success,
            group_results,
            exit_code,
            example_count,
            cancelled: false,
        }
    }

    /// Result for a run stopped by its cancellation token.
    pub fn cancelled(group_results: Vec<GroupResult>, example_count: usize) -> Self {
        Self {
            success: false,
            group_results,
            exit_code: exit_codes::EARLY_EXIT,
            example_count,
            cancelled: true,
        }
    }

    /// Result for a run that never reached example execution.
    pub fn infrastructure(exit_code: i32) -> Self {
        Self {
            success: false,
            group_results: Vec::new(),
            exit_code,
            example_count: 0,
            cancelled: false,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success={} exit_code={} groups={} examples={}",
            self.success,
            self.exit_code,
            self.group_results.len(),
            self.example_count
        )
    }
}

/// The last `capacity` results, oldest first.
#[derive(Debug, Clone)]
pub struct RunHistory {
    capacity: usize,
    results: VecDeque<RunResult>,
}

impl RunHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            results: VecDeque::new(),
        }
    }

    pub fn push(&mut self, result: RunResult) {
        if self.results.len() == self.capacity {
            self.results.pop_front();
        }
        self.results.push_back(result);
    }

    pub fn last(&self) -> Option<&RunResult> {
        self.results.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(success: bool) -> GroupResult {
        GroupResult {
            description: "group".to_string(),
            location: "./spec/a_spec.ws:1".to_string(),
            examples: 1,
            failures: usize::from(!success),
            success,
        }
    }

    #[test]
    fn aggregate_exit_codes() {
        let ok = RunResult::from_groups(vec![group(true), group(true)], 2, None);
        assert!(ok.success);
        assert_eq!(ok.exit_code, exit_codes::OK);

        let failed = RunResult::from_groups(vec![group(true), group(false)], 2, None);
        assert!(!failed.success);
        assert_eq!(failed.exit_code, exit_codes::FAILURE);

        let infra = RunResult::from_groups(vec![group(true)], 1, Some(7));
        assert!(!infra.success);
        assert_eq!(infra.exit_code, 7);
    }

    #[test]
    fn early_exit_failure_code_is_not_a_cancellation() {
        let infra = RunResult::infrastructure(exit_codes::EARLY_EXIT);
        assert!(!infra.was_cancelled());

        let aborted = RunResult::from_groups(vec![group(false)], 1, Some(exit_codes::EARLY_EXIT));
        assert!(!aborted.was_cancelled());

        let cancelled = RunResult::cancelled(vec![group(true)], 3);
        assert!(cancelled.was_cancelled());
        assert_eq!(cancelled.exit_code, exit_codes::EARLY_EXIT);
    }

    #[test]
    fn history_keeps_only_the_newest() {
        let mut history = RunHistory::new(2);
        history.push(RunResult::infrastructure(5));
        history.push(RunResult::infrastructure(6));
        history.push(RunResult::infrastructure(7));

        let codes: Vec<i32> = history.iter().map(|r| r.exit_code).collect();
        assert_eq!(codes, vec![6, 7]);
        assert_eq!(history.last().map(|r| r.exit_code), Some(7));
    }
}

//! Stable exit codes for runs and the console process.

/// Every executed example passed.
pub const OK: i32 = 0;
/// At least one example failed, or the console could not start.
pub const FAILURE: i32 = 1;
/// Default code for failures outside of examples (load errors, empty runs).
/// Overridable through the `failure_exit_code` configuration directive.
pub const INFRASTRUCTURE_FAILURE: i32 = 2;
/// The run was cancelled between groups before it finished.
pub const EARLY_EXIT: i32 = 130;

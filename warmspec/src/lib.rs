//! Warm suite console.
//!
//! Keeps one suite process alive across many runs. Each run gets the same
//! configured baseline: the one-time setup is recorded as a log of
//! configuration operations and replayed after every run. Runs come from an
//! interactive shell or from remote clients over TCP, and never overlap.
//!
//! - **[`core`]**: Pure in-memory logic (commands, results, change sets,
//!   cancellation). No I/O.
//! - **[`io`]**: Side-effecting adapters (profiles, output sinks, file
//!   watching, sockets, status and history files).
//! - **[`suite`]**: The bundled suite engine: parsing, loading, running and
//!   reporting examples.
//!
//! Orchestration modules ([`session`], [`runner`], [`snapshot`], [`shell`])
//! tie them together.

pub mod args;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod runner;
pub mod session;
pub mod shell;
pub mod snapshot;
pub mod suite;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

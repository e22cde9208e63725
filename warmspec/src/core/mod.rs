//! Deterministic, in-memory logic shared by the console.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod cancel;
pub mod changes;
pub mod command;
pub mod result;

//! Bundled suite engine.
//!
//! The console treats this as an opaque "load files, run groups, report"
//! capability. It is deliberately small: one-level groups, shared groups,
//! string/regex expectations, and a handful of configuration directives.

pub mod config;
pub mod example;
pub mod options;
pub mod parse;
pub mod reporter;
pub mod world;

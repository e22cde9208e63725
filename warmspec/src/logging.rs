//! Diagnostic tracing for the console.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: dev diagnostics via `RUST_LOG`, written to stderr.
//!   Never routed through run output sinks, so a remote client never sees it.
//!
//! - **Run output (`io/output`)**: reporter text for a run, delivered to the
//!   terminal or a socket depending on who asked for the run.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=warmspec=debug warmspec
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

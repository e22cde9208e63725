//! Warm suite console.
//!
//! Loads a profile from `.warmspec.toml`, records the init script's
//! configuration once, then runs suites on demand from the shell or from
//! `warmspec-client`.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use warmspec::exit_codes;
use warmspec::io::config::{CONFIG_FILE, load_config, prompt_for_profile, select_profile};
use warmspec::io::output::ConsoleSink;
use warmspec::session::{InterruptAction, Session, SessionOptions};

#[derive(Parser)]
#[command(
    name = "warmspec",
    version,
    about = "Keep a suite process warm and run it on demand"
)]
struct Cli {
    /// Profile name from the profile file.
    config: Option<String>,

    /// Profile file. Defaults to `.warmspec.toml` under the root.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Project root.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Serve remote requests on this port, overriding the profile.
    #[arg(long)]
    port: Option<u16>,
}

fn main() {
    warmspec::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config_file
        .clone()
        .unwrap_or_else(|| cli.root.join(CONFIG_FILE));
    let loaded = load_config(&config_path)?;

    let stdin = io::stdin();
    let mut profile = select_profile(loaded, cli.config.as_deref(), |profiles| {
        prompt_for_profile(&mut stdin.lock(), &mut io::stdout(), profiles)
    })?;
    if let Some(port) = cli.port {
        profile.server_port = Some(port);
    }

    let session = Session::new(SessionOptions {
        root: cli.root,
        profile,
        console: Arc::new(ConsoleSink::stdout()),
    });

    let interrupts = session.clone();
    ctrlc::set_handler(move || match interrupts.interrupt() {
        InterruptAction::Cancelled => {}
        InterruptAction::Terminate => {
            println!();
            std::process::exit(exit_codes::OK);
        }
    })
    .context("install interrupt handler")?;

    session.start(&mut stdin.lock())
}

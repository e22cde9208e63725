//! Remote client for a running warmspec console.
//!
//! Sends one shell-quoted request line and streams the run's output to
//! stdout until the console closes the connection.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "warmspec-client",
    version,
    about = "Run suites in a warm warmspec console"
)]
struct Cli {
    /// Console host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Console port.
    #[arg(long, default_value_t = 5678)]
    port: u16,

    /// Run arguments, as for the shell's `run` command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact())
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let line = request_line(&cli.args)?;

    let mut stream = TcpStream::connect((cli.host.as_str(), cli.port))
        .with_context(|| format!("connect to {}:{}", cli.host, cli.port))?;
    debug!(%line, "sending request");
    stream
        .write_all(format!("{line}\n").as_bytes())
        .context("send request")?;

    let mut stdout = io::stdout().lock();
    let mut buf = [0u8; 4096];
    loop {
        let read = stream.read(&mut buf).context("read response")?;
        if read == 0 {
            break;
        }
        stdout.write_all(&buf[..read]).context("write output")?;
        stdout.flush().context("flush output")?;
    }
    Ok(())
}

/// Shell-quote `args` into one request line.
fn request_line(args: &[String]) -> Result<String> {
    shlex::try_join(args.iter().map(String::as_str)).context("argument cannot be quoted")
}

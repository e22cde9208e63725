//! Interactive command loop.

use std::io::BufRead;

use tracing::{debug, warn};

use crate::core::command::{Command, help_text, parse_command};
use crate::exit_codes;
use crate::io::output::Sink;
use crate::session::Session;

/// Read commands from `input` until `exit` or end of input.
///
/// Output goes through the session router, so it follows this thread's route
/// (the console when unrouted). Returns the process exit code.
pub fn run_shell(session: &Session, input: &mut impl BufRead) -> i32 {
    let out = session.router().clone();
    let mut count = 1usize;
    loop {
        out.print(&format!("[{count}] warmspec> "));
        out.flush();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => {
                out.writeln("");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "could not read input");
                break;
            }
        }

        // Startup output comes before any command's output.
        session.await_startup();
        let command = match parse_command(line.trim()) {
            Ok(command) => command,
            Err(err) => {
                out.writeln(&err.to_string());
                count += 1;
                continue;
            }
        };
        debug!(?command, "shell command");
        match command {
            Command::Empty => continue,
            Command::Exit => break,
            Command::Help => out.print(&help_text()),
            Command::Run(args) => {
                if let Err(err) = session.submit_interactive_request(args) {
                    out.writeln(&err.to_string());
                }
            }
            Command::Refresh => match session.refresh() {
                Ok(reloaded) => debug!(reloaded, "refresh finished"),
                Err(err) => out.writeln(&format!("An error occurred while reloading.\n{err}")),
            },
            Command::Results => {
                let results = session.results();
                if results.is_empty() {
                    out.writeln("No runs yet.");
                }
                for (index, result) in results.iter().enumerate() {
                    out.writeln(&format!("{}) {result}", index + 1));
                }
            }
        }
        count += 1;
    }
    exit_codes::OK
}

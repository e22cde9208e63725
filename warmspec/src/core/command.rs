//! Interactive shell commands.
//!
//! Input lines are split with shell quoting rules, then the first word is
//! matched against [`COMMANDS`]. Dispatch happens on the [`Command`] variant.

use thiserror::Error;

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the suite with the given arguments (globs not yet expanded).
    Run(Vec<String>),
    /// Reload files changed since the last refresh.
    Refresh,
    /// Show the retained run results.
    Results,
    Help,
    Exit,
    /// Blank input.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Run,
    Refresh,
    Results,
    Help,
    Exit,
}

/// Static dispatch table entry.
#[derive(Debug)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    pub takes_args: bool,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        kind: CommandKind::Run,
        name: "run",
        usage: "run [options] [files]",
        description: "Run the suite. Globs are expanded except after --pattern.",
        takes_args: true,
    },
    CommandSpec {
        kind: CommandKind::Refresh,
        name: "refresh",
        usage: "refresh",
        description: "Load files in watched directories that changed since the last refresh.",
        takes_args: false,
    },
    CommandSpec {
        kind: CommandKind::Results,
        name: "results",
        usage: "results",
        description: "Show the most recent run results.",
        takes_args: false,
    },
    CommandSpec {
        kind: CommandKind::Help,
        name: "help",
        usage: "help",
        description: "List commands.",
        takes_args: false,
    },
    CommandSpec {
        kind: CommandKind::Exit,
        name: "exit",
        usage: "exit",
        description: "Leave the console.",
        takes_args: false,
    },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("{0} takes no arguments")]
    UnexpectedArguments(&'static str),
    #[error("unbalanced quotes in input")]
    Unbalanced,
}

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Parse one line of shell input.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let words = shlex::split(line).ok_or(CommandError::Unbalanced)?;
    let Some((name, rest)) = words.split_first() else {
        return Ok(Command::Empty);
    };
    let spec = lookup(name).ok_or_else(|| CommandError::Unknown(name.clone()))?;
    if !spec.takes_args && !rest.is_empty() {
        return Err(CommandError::UnexpectedArguments(spec.name));
    }
    Ok(match spec.kind {
        CommandKind::Run => Command::Run(rest.to_vec()),
        CommandKind::Refresh => Command::Refresh,
        CommandKind::Results => Command::Results,
        CommandKind::Help => Command::Help,
        CommandKind::Exit => Command::Exit,
    })
}

/// Render the command table for `help`.
pub fn help_text() -> String {
    let width = COMMANDS
        .iter()
        .map(|spec| spec.usage.len())
        .max()
        .unwrap_or(0);
    COMMANDS
        .iter()
        .map(|spec| format!("  {:width$}  {}\n", spec.usage, spec.description))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_keeps_quoted_arguments_together() {
        let cmd = parse_command(r#"run "spec/a b_spec.ws" -e 'adds two'"#).expect("parse");
        assert_eq!(
            cmd,
            Command::Run(vec![
                "spec/a b_spec.ws".to_string(),
                "-e".to_string(),
                "adds two".to_string(),
            ])
        );
    }

    #[test]
    fn blank_line_is_empty() {
        assert_eq!(parse_command("   ").expect("parse"), Command::Empty);
    }

    #[test]
    fn unknown_and_extra_args_are_errors() {
        assert_eq!(
            parse_command("launch spec"),
            Err(CommandError::Unknown("launch".to_string()))
        );
        assert_eq!(
            parse_command("refresh now"),
            Err(CommandError::UnexpectedArguments("refresh"))
        );
        assert_eq!(parse_command("run \"open"), Err(CommandError::Unbalanced));
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for spec in COMMANDS {
            assert!(help.contains(spec.usage), "missing {}", spec.name);
        }
    }
}

//! Line-oriented suite file parser.
//!
//! ```text
//! # comment
//! config formatter documentation
//! shared a calculator
//!   it adds
//!     expect 2 == 2
//! describe arithmetic
//!   include a calculator
//!   it compares
//!     puts comparing
//!     expect "a b" != "a c"
//!     expect 1234 =~ ^\d+$
//! ```
//!
//! `describe`, `shared` and `config` start a new top-level item; `it` opens an
//! example in the current block; every other keyword is a step of the open
//! example. Indentation carries no meaning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::suite::config::{ConfigError, ConfigOp};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}:{line}: {message}", path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SuiteFile {
    pub path: PathBuf,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub enum Item {
    Config { op: ConfigOp, line: usize },
    Shared(SharedDef),
    Group(GroupDef),
}

#[derive(Debug, Clone)]
pub struct SharedDef {
    pub name: String,
    pub line: usize,
    pub examples: Vec<ExampleDef>,
}

#[derive(Debug, Clone)]
pub struct GroupDef {
    pub description: String,
    pub line: usize,
    pub entries: Vec<GroupEntry>,
}

#[derive(Debug, Clone)]
pub enum GroupEntry {
    Example(ExampleDef),
    Include { name: String, line: usize },
}

#[derive(Debug, Clone)]
pub struct ExampleDef {
    pub description: String,
    pub line: usize,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub line: usize,
    /// Source text, shown as `Failure/Error:` when the step fails.
    pub source: String,
    pub kind: StepKind,
}

#[derive(Debug, Clone)]
pub enum StepKind {
    Expect {
        actual: String,
        matcher: Matcher,
    },
    Puts(String),
    Sleep(Duration),
}

#[derive(Debug, Clone)]
pub enum Matcher {
    Eq(String),
    Ne(String),
    Matches(Regex),
}

enum Block {
    Shared(SharedDef),
    Group(GroupDef),
}

struct Parser<'a> {
    path: &'a Path,
    items: Vec<Item>,
    block: Option<Block>,
    example: Option<ExampleDef>,
}

/// Parse `source` as the contents of `path`.
pub fn parse_suite(path: &Path, source: &str) -> Result<SuiteFile, ParseError> {
    let mut parser = Parser {
        path,
        items: Vec::new(),
        block: None,
        example: None,
    };
    for (index, raw) in source.lines().enumerate() {
        parser.line(index + 1, raw)?;
    }
    parser.close_block();
    Ok(SuiteFile {
        path: path.to_path_buf(),
        items: parser.items,
    })
}

impl Parser<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            path: self.path.to_path_buf(),
            line,
            message: message.into(),
        }
    }

    fn line(&mut self, line: usize, raw: &str) -> Result<(), ParseError> {
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            return Ok(());
        }
        let (keyword, rest) = match text.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (text, ""),
        };
        match keyword {
            "describe" => {
                let description = self.required(line, "describe", rest)?;
                self.close_block();
                self.block = Some(Block::Group(GroupDef {
                    description,
                    line,
                    entries: Vec::new(),
                }));
            }
            "shared" => {
                let name = self.required(line, "shared", rest)?;
                self.close_block();
                self.block = Some(Block::Shared(SharedDef {
                    name,
                    line,
                    examples: Vec::new(),
                }));
            }
            "config" => {
                let (directive, arg) = match rest.split_once(char::is_whitespace) {
                    Some((directive, arg)) => (directive, Some(arg)),
                    None => (rest, None),
                };
                let op = ConfigOp::parse(directive, arg)
                    .map_err(|err: ConfigError| self.error(line, err.to_string()))?;
                self.close_block();
                self.items.push(Item::Config { op, line });
            }
            "it" => {
                let description = self.required(line, "it", rest)?;
                if self.block.is_none() {
                    return Err(self.error(line, "`it` outside of describe or shared"));
                }
                self.close_example();
                self.example = Some(ExampleDef {
                    description,
                    line,
                    steps: Vec::new(),
                });
            }
            "include" => {
                let name = self.required(line, "include", rest)?;
                self.close_example();
                match self.block.as_mut() {
                    Some(Block::Group(group)) => group.entries.push(GroupEntry::Include { name, line }),
                    _ => return Err(self.error(line, "`include` is only allowed inside describe")),
                }
            }
            "expect" | "puts" | "sleep" => {
                let kind = self.step_kind(line, keyword, rest)?;
                let Some(example) = self.example.as_mut() else {
                    return Err(self.error(line, format!("`{keyword}` outside of an example")));
                };
                example.steps.push(Step {
                    line,
                    source: text.to_string(),
                    kind,
                });
            }
            other => return Err(self.error(line, format!("unknown keyword `{other}`"))),
        }
        Ok(())
    }

    fn required(&self, line: usize, keyword: &str, rest: &str) -> Result<String, ParseError> {
        if rest.is_empty() {
            return Err(self.error(line, format!("`{keyword}` needs a description")));
        }
        Ok(rest.to_string())
    }

    fn step_kind(&self, line: usize, keyword: &str, rest: &str) -> Result<StepKind, ParseError> {
        match keyword {
            "puts" => Ok(StepKind::Puts(unquote(rest).to_string())),
            "sleep" => rest
                .parse::<u64>()
                .map(|millis| StepKind::Sleep(Duration::from_millis(millis)))
                .map_err(|_| self.error(line, "`sleep` expects milliseconds")),
            _ => self.expectation(line, rest),
        }
    }

    fn expectation(&self, line: usize, rest: &str) -> Result<StepKind, ParseError> {
        let operator = [" == ", " != ", " =~ "]
            .into_iter()
            .filter_map(|op| rest.find(op).map(|at| (at, op)))
            .min_by_key(|(at, _)| *at);
        let Some((at, op)) = operator else {
            return Err(self.error(line, "`expect` needs ==, != or =~"));
        };
        let actual = unquote(rest[..at].trim()).to_string();
        let expected = unquote(rest[at + op.len()..].trim()).to_string();
        let matcher = match op.trim() {
            "==" => Matcher::Eq(expected),
            "!=" => Matcher::Ne(expected),
            _ => Regex::new(&expected)
                .map(Matcher::Matches)
                .map_err(|err| self.error(line, format!("invalid regex: {err}")))?,
        };
        Ok(StepKind::Expect { actual, matcher })
    }

    fn close_example(&mut self) {
        let Some(example) = self.example.take() else {
            return;
        };
        match self.block.as_mut() {
            Some(Block::Group(group)) => group.entries.push(GroupEntry::Example(example)),
            Some(Block::Shared(shared)) => shared.examples.push(example),
            None => {}
        }
    }

    fn close_block(&mut self) {
        self.close_example();
        match self.block.take() {
            Some(Block::Group(group)) => self.items.push(Item::Group(group)),
            Some(Block::Shared(shared)) => self.items.push(Item::Shared(shared)),
            None => {}
        }
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

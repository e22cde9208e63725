//! Per-run options: parsing, application to the configuration, file
//! selection and example filtering.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::suite::config::{ConfigError, ConfigOp, Configuration, Configure, Formatter};
use crate::suite::world::{Example, ExampleGroup, display_path};

/// Arguments accepted by `run`.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "run", about = "Run the suite", disable_version_flag = true)]
pub struct RunOptions {
    /// Files or directories to run. `path:line[:line]` selects by line.
    pub files: Vec<String>,

    /// Output format.
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<Formatter>,

    /// Only run examples whose full description contains this text.
    #[arg(short = 'e', long = "example")]
    pub example: Vec<String>,

    /// Only run examples that failed in their last recorded run.
    #[arg(long)]
    pub only_failures: bool,

    /// `--only-failures` plus `--fail-fast`.
    #[arg(long)]
    pub next_failure: bool,

    /// Stop after the first failing example.
    #[arg(long)]
    pub fail_fast: bool,

    /// Treat a run that selects no examples as a failure.
    #[arg(long)]
    pub fail_if_no_examples: bool,

    /// Glob used to find suite files when none are given (expanded here, not by the caller).
    #[arg(short = 'P', long = "pattern")]
    pub pattern: Option<String>,
}

/// A positional argument split into path and line filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: String,
    pub lines: Vec<usize>,
}

/// A suite file chosen for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub display: String,
    pub lines: Vec<usize>,
}

impl RunOptions {
    /// Parse run arguments. Never exits the process; `--help` is an error too.
    pub fn parse_args(args: &[String]) -> Result<Self, clap::Error> {
        Self::try_parse_from(std::iter::once("run".to_string()).chain(args.iter().cloned()))
    }

    pub fn only_failures(&self) -> bool {
        self.only_failures || self.next_failure
    }

    /// Apply option overrides on top of the replayed configuration.
    pub fn apply(&self, config: &mut Configuration) -> Result<(), ConfigError> {
        if let Some(format) = self.format {
            config.apply(&ConfigOp::SetFormatter(format))?;
        }
        if self.fail_fast || self.next_failure {
            config.apply(&ConfigOp::SetFailFast(true))?;
        }
        if self.fail_if_no_examples {
            config.apply(&ConfigOp::SetFailIfNoExamples(true))?;
        }
        if let Some(pattern) = &self.pattern {
            config.apply(&ConfigOp::SetDefaultPattern(pattern.clone()))?;
        }
        if self.only_failures() && config.persistence_path.is_none() {
            return Err(ConfigError::Abort(
                "To use `--only-failures`, you must first set `persistence_path` in the init script."
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn targets(&self) -> Vec<Target> {
        self.files.iter().map(|file| parse_target(file)).collect()
    }
}

fn parse_target(arg: &str) -> Target {
    let mut parts = arg.split(':');
    let path = parts.next().unwrap_or(arg);
    let lines: Option<Vec<usize>> = parts.map(|part| part.parse().ok()).collect();
    match lines {
        Some(lines) if !lines.is_empty() => Target {
            path: path.to_string(),
            lines,
        },
        _ => Target {
            path: arg.to_string(),
            lines: Vec::new(),
        },
    }
}

/// Resolve targets (or the pattern, when there are none) to suite files.
///
/// Directories expand with the file-name part of `pattern`. Files keep
/// argument order; the same file named twice merges its line filters.
/// Paths that match nothing are kept so that loading reports them.
pub fn resolve_files(
    root: &Path,
    targets: &[Target],
    pattern: &str,
) -> Result<Vec<SelectedFile>, ConfigError> {
    let mut selected: Vec<SelectedFile> = Vec::new();
    let mut push = |path: PathBuf, display: String, lines: &[usize]| {
        match selected.iter_mut().find(|file| file.display == display) {
            Some(existing) => existing.lines.extend_from_slice(lines),
            None => selected.push(SelectedFile {
                path,
                display,
                lines: lines.to_vec(),
            }),
        }
    };

    if targets.is_empty() {
        for path in glob_under(root, pattern)? {
            let display = relative_display(root, &path);
            push(path, display, &[]);
        }
        return Ok(selected);
    }

    let file_pattern = Path::new(pattern)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("*");
    for target in targets {
        let full = root.join(&target.path);
        if full.is_dir() {
            let dir_pattern = format!("{}/**/{file_pattern}", target.path.trim_end_matches('/'));
            for path in glob_under(root, &dir_pattern)? {
                let display = relative_display(root, &path);
                push(path, display, &target.lines);
            }
        } else {
            push(full, display_path(&target.path), &target.lines);
        }
    }
    Ok(selected)
}

fn glob_under(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let full = root.join(pattern);
    let full = full.to_string_lossy();
    let paths = glob::glob(&full)
        .map_err(|err| ConfigError::Abort(format!("invalid pattern `{pattern}`: {err}")))?;
    let mut files: Vec<PathBuf> = paths
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn relative_display(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    display_path(&relative.to_string_lossy())
}

/// Example selection for one run.
#[derive(Debug, Clone, Default)]
pub struct ExampleFilter {
    lines: BTreeMap<String, Vec<usize>>,
    descriptions: Vec<String>,
    only_ids: Option<HashSet<String>>,
}

impl ExampleFilter {
    pub fn new(files: &[SelectedFile], descriptions: &[String]) -> Self {
        let lines = files
            .iter()
            .filter(|file| !file.lines.is_empty())
            .map(|file| (file.display.clone(), file.lines.clone()))
            .collect();
        Self {
            lines,
            descriptions: descriptions.to_vec(),
            only_ids: None,
        }
    }

    /// Restrict to the given example ids (last-failed examples).
    pub fn only(mut self, ids: HashSet<String>) -> Self {
        self.only_ids = Some(ids);
        self
    }

    pub fn selects(&self, group: &ExampleGroup, example: &Example) -> bool {
        if let Some(lines) = self.lines.get(&group.file)
            && !lines.iter().any(|&line| line_selects(group, example, line))
        {
            return false;
        }
        if !self.descriptions.is_empty()
            && !self
                .descriptions
                .iter()
                .any(|text| example.full_description.contains(text.as_str()))
        {
            return false;
        }
        match &self.only_ids {
            Some(ids) => ids.contains(&example.id),
            None => true,
        }
    }

    /// Groups with their selected examples, dropping groups left empty.
    pub fn apply(&self, groups: &[ExampleGroup]) -> Vec<ExampleGroup> {
        groups
            .iter()
            .filter_map(|group| {
                let examples: Vec<Example> = group
                    .examples
                    .iter()
                    .filter(|example| self.selects(group, example))
                    .cloned()
                    .collect();
                if examples.is_empty() {
                    None
                } else {
                    Some(ExampleGroup {
                        examples,
                        ..group.clone()
                    })
                }
            })
            .collect()
    }
}

/// A line inside an example selects that example. Any other line inside the
/// group selects every example of the group.
fn line_selects(group: &ExampleGroup, example: &Example, line: usize) -> bool {
    let encloses =
        |candidate: &Example| candidate.origin == group.file && candidate.lines().contains(&line);
    if encloses(example) {
        return true;
    }
    group.lines().contains(&line) && !group.examples.iter().any(encloses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::output::NullSink;
    use crate::suite::parse::{Step, StepKind};
    use std::fs;
    use std::sync::Arc;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn example(id: &str, line: usize, full: &str) -> Example {
        Example {
            id: id.to_string(),
            description: full.to_string(),
            full_description: full.to_string(),
            origin: "./a_spec.ws".to_string(),
            location: format!("./a_spec.ws:{line}"),
            line,
            steps: Vec::new(),
        }
    }

    #[test]
    fn parses_flags_and_files() {
        let opts = RunOptions::parse_args(&args(&[
            "spec/a_spec.ws:4:9",
            "-f",
            "documentation",
            "--pattern",
            "lib/**/*_spec.ws",
            "-e",
            "adds",
            "--next-failure",
        ]))
        .expect("parse");
        assert_eq!(opts.format, Some(Formatter::Documentation));
        assert_eq!(opts.pattern.as_deref(), Some("lib/**/*_spec.ws"));
        assert!(opts.only_failures());
        assert_eq!(
            opts.targets(),
            vec![Target {
                path: "spec/a_spec.ws".to_string(),
                lines: vec![4, 9],
            }]
        );
    }

    #[test]
    fn bad_arguments_are_errors_not_exits() {
        assert!(RunOptions::parse_args(&args(&["--bogus"])).is_err());
        assert!(RunOptions::parse_args(&args(&["--format", "xml"])).is_err());
        assert!(RunOptions::parse_args(&args(&["--help"])).is_err());
    }

    #[test]
    fn only_failures_needs_persistence_path() {
        let mut config = Configuration::new(Arc::new(NullSink));
        let opts = RunOptions::parse_args(&args(&["--only-failures"])).expect("parse");
        assert!(matches!(opts.apply(&mut config), Err(ConfigError::Abort(_))));

        config.persistence_path = Some(PathBuf::from(".warmspec_results"));
        opts.apply(&mut config).expect("apply");
    }

    #[test]
    fn targets_without_numeric_suffix_stay_whole() {
        assert_eq!(
            parse_target("spec/odd:name_spec.ws"),
            Target {
                path: "spec/odd:name_spec.ws".to_string(),
                lines: Vec::new(),
            }
        );
    }

    #[test]
    fn resolve_uses_pattern_and_expands_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("spec/nested")).expect("mkdir");
        fs::write(root.join("spec/b_spec.ws"), "").expect("write");
        fs::write(root.join("spec/nested/a_spec.ws"), "").expect("write");
        fs::write(root.join("spec/helper.ws"), "").expect("write");

        let all = resolve_files(root, &[], "spec/**/*_spec.ws").expect("resolve");
        let displays: Vec<&str> = all.iter().map(|f| f.display.as_str()).collect();
        assert_eq!(displays, vec!["./spec/b_spec.ws", "./spec/nested/a_spec.ws"]);

        let targets = vec![
            parse_target("spec/nested"),
            parse_target("spec/b_spec.ws:3"),
            parse_target("spec/b_spec.ws:5"),
        ];
        let picked = resolve_files(root, &targets, "spec/**/*_spec.ws").expect("resolve");
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].display, "./spec/nested/a_spec.ws");
        assert_eq!(picked[1].lines, vec![3, 5]);
    }

    #[test]
    fn filter_by_line_description_and_ids() {
        let mut group = ExampleGroup {
            description: "group".to_string(),
            file: "./a_spec.ws".to_string(),
            line: 1,
            end_line: 6,
            examples: vec![
                example("./a_spec.ws[1:1]", 2, "group adds"),
                example("./a_spec.ws[1:2]", 5, "group subtracts"),
            ],
        };
        group.examples[0].steps.push(Step {
            line: 3,
            source: "puts adding".to_string(),
            kind: StepKind::Puts("adding".to_string()),
        });
        let files = vec![SelectedFile {
            path: PathBuf::from("a_spec.ws"),
            display: "./a_spec.ws".to_string(),
            lines: vec![5],
        }];

        let by_line = ExampleFilter::new(&files, &[]).apply(std::slice::from_ref(&group));
        assert_eq!(by_line[0].examples.len(), 1);
        assert_eq!(by_line[0].examples[0].line, 5);

        let by_text = ExampleFilter::new(&[], &["adds".to_string()]).apply(std::slice::from_ref(&group));
        assert_eq!(by_text[0].examples[0].line, 2);

        let inside_body = vec![SelectedFile {
            lines: vec![3],
            ..files[0].clone()
        }];
        let by_body_line = ExampleFilter::new(&inside_body, &[]).apply(std::slice::from_ref(&group));
        assert_eq!(by_body_line[0].examples.len(), 1);
        assert_eq!(by_body_line[0].examples[0].line, 2);

        let between = vec![SelectedFile {
            lines: vec![4],
            ..files[0].clone()
        }];
        let whole_group = ExampleFilter::new(&between, &[]).apply(std::slice::from_ref(&group));
        assert_eq!(whole_group[0].examples.len(), 2);

        let outside = vec![SelectedFile {
            lines: vec![9],
            ..files[0].clone()
        }];
        assert!(ExampleFilter::new(&outside, &[]).apply(std::slice::from_ref(&group)).is_empty());

        let none = ExampleFilter::new(&[], &[])
            .only(HashSet::new())
            .apply(std::slice::from_ref(&group));
        assert!(none.is_empty());
    }
}

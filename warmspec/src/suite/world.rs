//! Registry of loaded example groups and shared group registrations.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::suite::config::{ConfigError, Configure};
use crate::suite::parse::{
    ExampleDef, GroupDef, GroupEntry, Item, ParseError, SharedDef, Step, parse_suite,
};

/// A shared group and the display path of the file that registered it.
#[derive(Debug, Clone)]
pub struct RegisteredShared {
    pub origin: String,
    pub def: SharedDef,
}

/// Shared groups by name.
pub type SharedRegistry = BTreeMap<String, RegisteredShared>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{origin}:{line}: {source}")]
    Config {
        origin: String,
        line: usize,
        #[source]
        source: ConfigError,
    },
    #[error("{origin}:{line}: could not find shared examples `{name}`")]
    MissingShared {
        origin: String,
        line: usize,
        name: String,
    },
}

#[derive(Debug, Clone)]
pub struct Example {
    /// Stable id: `<file>[<group>:<example>]`, both 1-based.
    pub id: String,
    pub description: String,
    pub full_description: String,
    /// File that defined the example (differs from the group's file for
    /// included shared examples).
    pub origin: String,
    /// `<origin>:<line>` of the `it` line.
    pub location: String,
    pub line: usize,
    pub steps: Vec<Step>,
}

impl Example {
    /// Lines of `origin` from the `it` line through the last step.
    pub fn lines(&self) -> RangeInclusive<usize> {
        self.line..=self.steps.last().map_or(self.line, |step| step.line)
    }
}

#[derive(Debug, Clone)]
pub struct ExampleGroup {
    pub description: String,
    pub file: String,
    pub line: usize,
    /// Last line of `file` that belongs to the group.
    pub end_line: usize,
    pub examples: Vec<Example>,
}

impl ExampleGroup {
    pub fn location(&self) -> String {
        format!("{}:{}", self.file, self.line)
    }

    pub fn lines(&self) -> RangeInclusive<usize> {
        self.line..=self.end_line
    }
}

/// Framework-side run state. Reset between runs; shared registrations are
/// put back by the snapshot cache after each reset.
#[derive(Debug, Default)]
pub struct World {
    groups: Vec<ExampleGroup>,
    shared: SharedRegistry,
    non_example_failure: bool,
}

/// `./`-prefixed form of a relative path, as shown in reports.
pub fn display_path(path: &str) -> String {
    if path.starts_with("./") || path.starts_with('/') || path.starts_with("../") {
        path.to_string()
    } else {
        format!("./{path}")
    }
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop loaded groups, shared registrations, and failure flags.
    pub fn reset(&mut self) {
        self.groups.clear();
        self.shared.clear();
        self.non_example_failure = false;
    }

    pub fn groups(&self) -> &[ExampleGroup] {
        &self.groups
    }

    pub fn example_count(&self) -> usize {
        self.groups.iter().map(|group| group.examples.len()).sum()
    }

    pub fn shared_groups(&self) -> &SharedRegistry {
        &self.shared
    }

    pub fn restore_shared(&mut self, registry: SharedRegistry) {
        self.shared = registry;
    }

    pub fn define_shared(&mut self, origin: &str, def: SharedDef) {
        debug!(name = %def.name, origin, "registering shared examples");
        self.shared.insert(
            def.name.clone(),
            RegisteredShared {
                origin: origin.to_string(),
                def,
            },
        );
    }

    pub fn record_non_example_failure(&mut self) {
        self.non_example_failure = true;
    }

    pub fn non_example_failure(&self) -> bool {
        self.non_example_failure
    }

    /// Load a helper/source file: apply its config directives and register
    /// its shared groups. `describe` blocks are ignored.
    ///
    /// Returns the registrations the file (re)defined.
    pub fn load_source(
        &mut self,
        path: &Path,
        display: &str,
        config: &mut dyn Configure,
    ) -> Result<Vec<RegisteredShared>, LoadError> {
        self.load(path, display, config, false)
    }

    /// Load a suite file for a run: like [`World::load_source`], plus its
    /// example groups are appended in definition order.
    pub fn load_suite(
        &mut self,
        path: &Path,
        display: &str,
        config: &mut dyn Configure,
    ) -> Result<Vec<RegisteredShared>, LoadError> {
        self.load(path, display, config, true)
    }

    fn load(
        &mut self,
        path: &Path,
        display: &str,
        config: &mut dyn Configure,
        with_groups: bool,
    ) -> Result<Vec<RegisteredShared>, LoadError> {
        let source = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let suite = parse_suite(Path::new(display), &source)?;

        let mut defined = Vec::new();
        let mut group_index = 0;
        for item in suite.items {
            match item {
                Item::Config { op, line } => {
                    config.apply(&op).map_err(|source| LoadError::Config {
                        origin: display.to_string(),
                        line,
                        source,
                    })?;
                }
                Item::Shared(def) => {
                    self.define_shared(display, def.clone());
                    defined.push(RegisteredShared {
                        origin: display.to_string(),
                        def,
                    });
                }
                Item::Group(def) if with_groups => {
                    group_index += 1;
                    let group = self.resolve_group(display, group_index, def)?;
                    self.groups.push(group);
                }
                Item::Group(_) => {}
            }
        }
        Ok(defined)
    }

    fn resolve_group(
        &self,
        file: &str,
        group_index: usize,
        def: GroupDef,
    ) -> Result<ExampleGroup, LoadError> {
        let mut examples = Vec::new();
        let mut end_line = def.line;
        for entry in def.entries {
            match entry {
                GroupEntry::Example(example) => {
                    let last = example.steps.last().map_or(example.line, |step| step.line);
                    end_line = end_line.max(last);
                    examples.push((file.to_string(), example));
                }
                GroupEntry::Include { name, line } => {
                    end_line = end_line.max(line);
                    let shared = self.shared.get(&name).ok_or_else(|| LoadError::MissingShared {
                        origin: file.to_string(),
                        line,
                        name: name.clone(),
                    })?;
                    examples.extend(
                        shared
                            .def
                            .examples
                            .iter()
                            .map(|example| (shared.origin.clone(), example.clone())),
                    );
                }
            }
        }

        let examples = examples
            .into_iter()
            .enumerate()
            .map(|(index, (origin, example))| {
                build_example(file, group_index, index + 1, &def.description, &origin, example)
            })
            .collect();
        Ok(ExampleGroup {
            description: def.description,
            file: file.to_string(),
            line: def.line,
            end_line,
            examples,
        })
    }
}

fn build_example(
    file: &str,
    group_index: usize,
    example_index: usize,
    group_description: &str,
    origin: &str,
    def: ExampleDef,
) -> Example {
    Example {
        id: format!("{file}[{group_index}:{example_index}]"),
        full_description: format!("{group_description} {}", def.description),
        location: format!("{origin}:{}", def.line),
        origin: origin.to_string(),
        line: def.line,
        description: def.description,
        steps: def.steps,
    }
}

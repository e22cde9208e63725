//! Caller-side glob expansion for run arguments.
//!
//! The pattern flag and its value are passed through untouched: the engine
//! expands that glob itself.

use std::path::Path;

use tracing::debug;

const PASSTHROUGH_FLAGS: &[&str] = &["-P", "--pattern"];

fn is_glob(arg: &str) -> bool {
    arg.contains(['*', '?', '['])
}

/// Expand glob arguments against `root`, in sorted order. Arguments with no
/// match are kept literally so the engine can report them.
pub fn expand_globs(root: &Path, args: &[String]) -> Vec<String> {
    let mut expanded = Vec::with_capacity(args.len());
    let mut passthrough_next = false;
    for arg in args {
        if passthrough_next {
            passthrough_next = false;
            expanded.push(arg.clone());
            continue;
        }
        if PASSTHROUGH_FLAGS.contains(&arg.as_str()) {
            passthrough_next = true;
            expanded.push(arg.clone());
            continue;
        }
        if arg.starts_with('-') || !is_glob(arg) {
            expanded.push(arg.clone());
            continue;
        }
        let matches = glob_relative(root, arg);
        if matches.is_empty() {
            expanded.push(arg.clone());
        } else {
            debug!(pattern = %arg, matches = matches.len(), "expanded argument glob");
            expanded.extend(matches);
        }
    }
    expanded
}

fn glob_relative(root: &Path, pattern: &str) -> Vec<String> {
    let absolute = root.join(pattern);
    let Ok(paths) = glob::glob(&absolute.to_string_lossy()) else {
        return Vec::new();
    };
    let mut matches: Vec<String> = paths
        .filter_map(Result::ok)
        .map(|path| {
            path.strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    matches.sort();
    matches
}

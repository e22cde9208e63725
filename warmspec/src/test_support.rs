//! Test-only helpers: scratch projects, sessions over them, and sinks that
//! observe run output.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::core::cancel::CancelToken;
use crate::io::config::Profile;
use crate::io::output::{BufferSink, Sink};
use crate::session::{Session, SessionOptions};

/// A project directory that is deleted on drop.
pub struct ScratchProject {
    dir: tempfile::TempDir,
}

impl ScratchProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Rewrite `relative` and push its mtime `secs` into the future so a
    /// poll scan sees the change regardless of timestamp granularity.
    pub fn rewrite(&self, relative: &str, contents: &str, secs: u64) {
        let path = self.write(relative, contents);
        let file = fs::File::options().write(true).open(&path).expect("open");
        file.set_modified(SystemTime::now() + Duration::from_secs(secs))
            .expect("set mtime");
    }

    /// A session over this project with its console captured.
    pub fn session(&self, profile: Profile) -> (Session, Arc<BufferSink>) {
        let console = Arc::new(BufferSink::new());
        let session = Session::new(SessionOptions {
            root: self.path().to_path_buf(),
            profile,
            console: console.clone(),
        });
        (session, console)
    }
}

impl Default for ScratchProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Suite with one group of `count` passing examples.
pub fn passing_suite(group: &str, count: usize) -> String {
    let mut suite = format!("describe {group}\n");
    for index in 1..=count {
        suite.push_str(&format!("  it passes {index}\n    expect {index} == {index}\n"));
    }
    suite
}

/// Suite with one group whose single example fails.
pub fn failing_suite(group: &str) -> String {
    format!("describe {group}\n  it fails\n    expect left == right\n")
}

/// Suite with `groups` groups, each printing `<marker> <n>` before passing.
pub fn marked_groups(groups: usize, marker: &str) -> String {
    let mut suite = String::new();
    for index in 1..=groups {
        suite.push_str(&format!(
            "describe group {index}\n  it runs\n    puts {marker} {index}\n    expect ok == ok\n"
        ));
    }
    suite
}

/// Captures output and cancels `token` once `trigger` has been written.
pub struct CancellingSink {
    buffer: BufferSink,
    trigger: String,
    token: CancelToken,
}

impl CancellingSink {
    pub fn new(trigger: &str, token: CancelToken) -> Self {
        Self {
            buffer: BufferSink::new(),
            trigger: trigger.to_string(),
            token,
        }
    }

    pub fn contents(&self) -> String {
        self.buffer.contents()
    }
}

impl Sink for CancellingSink {
    fn print(&self, text: &str) {
        self.buffer.print(text);
        if text.contains(&self.trigger) {
            self.token.cancel();
        }
    }

    fn flush(&self) {}

    fn is_closed(&self) -> bool {
        false
    }
}

/// Appends `(tag, text)` pairs to a log shared by several sinks, so tests
/// can check whether output from different runs interleaved.
pub struct TaggedSink {
    tag: String,
    log: Arc<Mutex<Vec<(String, String)>>>,
}

impl TaggedSink {
    pub fn new(tag: &str, log: Arc<Mutex<Vec<(String, String)>>>) -> Self {
        Self {
            tag: tag.to_string(),
            log,
        }
    }
}

impl Sink for TaggedSink {
    fn print(&self, text: &str) {
        self.log.lock().push((self.tag.clone(), text.to_string()));
    }

    fn flush(&self) {}

    fn is_closed(&self) -> bool {
        false
    }
}

/// Number of tag changes in a tagged log: 1 means no interleaving for two runs.
pub fn tag_switches(log: &[(String, String)]) -> usize {
    log.windows(2).filter(|pair| pair[0].0 != pair[1].0).count()
}

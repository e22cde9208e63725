//! File change tracker: detect changed sources and reload them between runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::changes::{PendingChanges, WatchedFileSet};
use crate::io::config::WatchStrategy;
use crate::suite::config::Configure;
use crate::suite::world::{LoadError, RegisteredShared, World, display_path};

/// Loads one changed source file, returning the shared groups it defined.
pub trait SourceLoader {
    fn load_source(&mut self, path: &Path) -> Result<Vec<RegisteredShared>, LoadError>;
}

/// [`SourceLoader`] over the live world and configuration.
pub struct WorldLoader<'a> {
    pub root: &'a Path,
    pub world: &'a mut World,
    pub config: &'a mut dyn Configure,
}

impl SourceLoader for WorldLoader<'_> {
    fn load_source(&mut self, path: &Path) -> Result<Vec<RegisteredShared>, LoadError> {
        let relative = path.strip_prefix(self.root).unwrap_or(path);
        let display = display_path(&relative.to_string_lossy());
        self.world.load_source(path, &display, self.config)
    }
}

enum Detector {
    Poll { known: WatchedFileSet },
    Notify { _watcher: PollWatcher },
}

pub struct FileTracker {
    dirs: Vec<PathBuf>,
    extensions: Vec<String>,
    pending: Arc<PendingChanges>,
    detector: Detector,
}

impl FileTracker {
    /// Seed the tracker for `dirs`. Directories that do not exist are
    /// skipped with a warning.
    pub fn new(
        dirs: Vec<PathBuf>,
        extensions: Vec<String>,
        strategy: WatchStrategy,
        poll_interval: Duration,
    ) -> Result<Self> {
        let pending = Arc::new(PendingChanges::new());
        let detector = match strategy {
            WatchStrategy::Poll => Detector::Poll {
                known: scan(&dirs, &extensions),
            },
            WatchStrategy::Notify => Detector::Notify {
                _watcher: install_watcher(&dirs, &extensions, Arc::clone(&pending), poll_interval)?,
            },
        };
        if let Detector::Poll { known } = &detector {
            debug!(files = known.len(), "seeded watched file set");
        }
        Ok(Self {
            dirs,
            extensions,
            pending,
            detector,
        })
    }

    /// Handle for marking paths changed from outside the detector.
    pub fn pending(&self) -> Arc<PendingChanges> {
        Arc::clone(&self.pending)
    }

    /// Reload every file changed since the previous refresh, in detection
    /// order, calling `on_type_defined` for each shared group (re)defined.
    ///
    /// Returns the number of files reloaded. The first load error aborts the
    /// cycle; the failing file and those not yet attempted stay pending, so
    /// every refresh fails until the file loads.
    pub fn refresh(
        &mut self,
        loader: &mut dyn SourceLoader,
        on_type_defined: &mut dyn FnMut(&RegisteredShared),
    ) -> Result<usize, LoadError> {
        if let Detector::Poll { known } = &mut self.detector {
            let next = scan(&self.dirs, &self.extensions);
            self.pending.extend(known.changed_in(&next));
            *known = next;
        }

        let paths = self.pending.drain();
        if paths.is_empty() {
            return Ok(0);
        }
        for (index, path) in paths.iter().enumerate() {
            debug!(path = %path.display(), "reloading changed file");
            match loader.load_source(path) {
                Ok(defined) => {
                    for registration in &defined {
                        on_type_defined(registration);
                    }
                }
                Err(err) => {
                    self.pending.requeue(paths[index..].to_vec());
                    return Err(err);
                }
            }
        }
        info!(files = paths.len(), "reloaded changed files");
        Ok(paths.len())
    }
}

fn has_tracked_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext))
}

/// `{path, mtime}` for every tracked file under `dirs`.
fn scan(dirs: &[PathBuf], extensions: &[String]) -> WatchedFileSet {
    let mut set = WatchedFileSet::new();
    for dir in dirs {
        for entry in WalkDir::new(dir).into_iter().filter_map(|entry| entry.ok()) {
            if !entry.file_type().is_file() || !has_tracked_extension(entry.path(), extensions) {
                continue;
            }
            if let Some(modified) = entry.metadata().ok().and_then(|meta| meta.modified().ok()) {
                set.insert(entry.into_path(), modified);
            }
        }
    }
    set
}

fn install_watcher(
    dirs: &[PathBuf],
    extensions: &[String],
    pending: Arc<PendingChanges>,
    poll_interval: Duration,
) -> Result<PollWatcher> {
    let extensions = extensions.to_vec();
    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                pending.extend(
                    event
                        .paths
                        .into_iter()
                        .filter(|path| has_tracked_extension(path, &extensions)),
                );
            }
            Err(err) => warn!(error = %err, "file watcher error"),
        },
        notify::Config::default().with_poll_interval(poll_interval),
    )
    .context("create file watcher")?;

    for dir in dirs {
        if !dir.exists() {
            warn!(path = %dir.display(), "watch directory does not exist");
            continue;
        }
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .with_context(|| format!("watch {}", dir.display()))?;
        info!(path = %dir.display(), "watching directory");
    }
    Ok(watcher)
}

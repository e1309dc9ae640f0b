//! File change notification
//!
//! Watchers only collect changed paths. The runtime drains them inside its
//! update pump, so scheduler and registry state never change on another thread.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Source of changed-path batches
pub trait FileWatcher: Send {
    /// Start watching a file
    fn watch(&mut self, path: &Path) -> Result<()>;

    /// Stop watching a file
    fn unwatch(&mut self, path: &Path);

    fn is_watching(&self, path: &Path) -> bool;

    /// Paths changed since the last poll, without duplicates
    fn poll_changes(&mut self) -> Vec<PathBuf>;

    /// Stop watching everything
    fn unwatch_all(&mut self);
}

/// Thread-safe inbox for changed paths reported from anywhere in the process
#[derive(Debug, Clone, Default)]
pub struct ChangeNotifier {
    inbox: Arc<Mutex<Vec<PathBuf>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report changed paths; they are applied on the next update
    pub fn notify<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.inbox.lock().extend(paths.into_iter().map(Into::into));
    }

    /// Drain everything reported so far
    pub fn take(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.inbox.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.inbox.lock().is_empty()
    }
}

#[derive(Debug, Default)]
struct MemoryWatchState {
    watching: BTreeSet<PathBuf>,
    changed: Vec<PathBuf>,
}

/// In-memory watcher for tests; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryFileWatcher {
    state: Arc<Mutex<MemoryWatchState>>,
}

impl MemoryFileWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a file was modified; ignored unless it is watched
    pub fn simulate_change(&self, path: impl AsRef<Path>) {
        let mut state = self.state.lock();
        let path = path.as_ref();
        if state.watching.contains(path) {
            state.changed.push(path.to_path_buf());
        }
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        self.state.lock().watching.iter().cloned().collect()
    }
}

impl FileWatcher for MemoryFileWatcher {
    fn watch(&mut self, path: &Path) -> Result<()> {
        self.state.lock().watching.insert(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) {
        self.state.lock().watching.remove(path);
    }

    fn is_watching(&self, path: &Path) -> bool {
        self.state.lock().watching.contains(path)
    }

    fn poll_changes(&mut self) -> Vec<PathBuf> {
        dedup(std::mem::take(&mut self.state.lock().changed))
    }

    fn unwatch_all(&mut self) {
        let mut state = self.state.lock();
        state.watching.clear();
        state.changed.clear();
    }
}

fn dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

#[cfg(feature = "hot-reload")]
pub use self::os::NotifyFileWatcher;

#[cfg(feature = "hot-reload")]
mod os {
    use super::*;
    use std::collections::HashMap;
    use std::sync::mpsc::{channel, Receiver};

    use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

    use crate::error::HotSwapError;

    /// Watcher backed by the OS notification API.
    ///
    /// Parent directories are watched rather than the files themselves, so
    /// editors that save by replacing the file are still seen.
    pub struct NotifyFileWatcher {
        watcher: RecommendedWatcher,
        events: Receiver<notify::Result<Event>>,
        files: BTreeSet<PathBuf>,
        /// directory -> number of watched files inside it
        directories: HashMap<PathBuf, usize>,
    }

    impl NotifyFileWatcher {
        pub fn new() -> Result<Self> {
            let (tx, rx) = channel();
            let watcher = notify::recommended_watcher(move |res| {
                let _ = tx.send(res);
            })
            .map_err(|e| HotSwapError::Watch(e.to_string()))?;

            Ok(Self {
                watcher,
                events: rx,
                files: BTreeSet::new(),
                directories: HashMap::new(),
            })
        }
    }

    impl FileWatcher for NotifyFileWatcher {
        fn watch(&mut self, path: &Path) -> Result<()> {
            let path = std::fs::canonicalize(path)?;
            if self.files.contains(&path) {
                return Ok(());
            }

            let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let count = self.directories.entry(directory.clone()).or_insert(0);
            if *count == 0 {
                self.watcher
                    .watch(&directory, RecursiveMode::NonRecursive)
                    .map_err(|e| HotSwapError::Watch(e.to_string()))?;
            }
            *count += 1;

            log::debug!("Watching {}", path.display());
            self.files.insert(path);
            Ok(())
        }

        fn unwatch(&mut self, path: &Path) {
            let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            if !self.files.remove(&path) {
                return;
            }

            let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
            if let Some(count) = self.directories.get_mut(&directory) {
                *count -= 1;
                if *count == 0 {
                    self.directories.remove(&directory);
                    let _ = self.watcher.unwatch(&directory);
                }
            }
        }

        fn is_watching(&self, path: &Path) -> bool {
            let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            self.files.contains(&path)
        }

        fn poll_changes(&mut self) -> Vec<PathBuf> {
            let mut changed = Vec::new();
            while let Ok(result) = self.events.try_recv() {
                match result {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            let paths = event.paths.into_iter();
                            changed.extend(paths.filter(|p| self.files.contains(p)));
                        }
                    }
                    Err(e) => log::warn!("File watch error: {}", e),
                }
            }
            dedup(changed)
        }

        fn unwatch_all(&mut self) {
            for directory in self.directories.keys() {
                let _ = self.watcher.unwatch(directory);
            }
            self.directories.clear();
            self.files.clear();
            while self.events.try_recv().is_ok() {}
        }
    }
}

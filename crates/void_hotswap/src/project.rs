//! Independently rebuilt groups of sources

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::build::BuildHandle;
use crate::config::ProjectConfig;
use crate::tracker::DependencyTracker;

/// Index of a project in the runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ProjectId(pub u16);

impl ProjectId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One file handed to the build tool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildFile {
    pub path: PathBuf,
    /// Recompile even if a cached object exists
    pub force_rebuild: bool,
}

/// Set of files queued for a build, keyed by path.
///
/// Adding a path twice keeps one entry and ORs the force flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFileList {
    files: BTreeMap<PathBuf, bool>,
}

impl BuildFileList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, force_rebuild: bool) {
        let entry = self.files.entry(path.into()).or_insert(false);
        *entry |= force_rebuild;
    }

    /// Move every entry of `other` into this list
    pub fn merge(&mut self, other: BuildFileList) {
        for (path, force) in other.files {
            self.insert(path, force);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn is_forced(&self, path: &Path) -> bool {
        self.files.get(path).copied().unwrap_or(false)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Empty the list, returning its previous contents
    pub fn take(&mut self) -> BuildFileList {
        std::mem::take(self)
    }

    pub fn to_build_files(&self) -> Vec<BuildFile> {
        self.files
            .iter()
            .map(|(path, force)| BuildFile {
                path: path.clone(),
                force_rebuild: *force,
            })
            .collect()
    }
}

impl FromIterator<(PathBuf, bool)> for BuildFileList {
    fn from_iter<I: IntoIterator<Item = (PathBuf, bool)>>(iter: I) -> Self {
        let mut list = BuildFileList::new();
        for (path, force) in iter {
            list.insert(path, force);
        }
        list
    }
}

/// Build currently running for a project
#[derive(Debug, Clone)]
pub struct InFlightBuild {
    pub handle: BuildHandle,
    /// Temporary module path the build writes to
    pub output_path: PathBuf,
    /// Files compiled into it
    pub files: BuildFileList,
}

/// A project: dependency graph plus build pipeline
#[derive(Debug)]
pub struct Project {
    id: ProjectId,
    config: ProjectConfig,
    tracker: DependencyTracker,
    /// Queued for the next build
    build_files: BuildFileList,
    /// Accumulated while a build is running
    pending_build_files: BuildFileList,
    in_flight: Option<InFlightBuild>,
}

impl Project {
    pub fn new(id: ProjectId, config: ProjectConfig, header_extensions: Vec<String>) -> Self {
        Self {
            id,
            config,
            tracker: DependencyTracker::new(header_extensions),
            build_files: BuildFileList::new(),
            pending_build_files: BuildFileList::new(),
            in_flight: None,
        }
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut DependencyTracker {
        &mut self.tracker
    }

    pub fn build_files(&self) -> &BuildFileList {
        &self.build_files
    }

    pub fn pending_build_files(&self) -> &BuildFileList {
        &self.pending_build_files
    }

    pub fn in_flight(&self) -> Option<&InFlightBuild> {
        self.in_flight.as_ref()
    }

    pub fn is_building(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Queue resolved changes; they wait in pending while a build runs
    pub fn queue(&mut self, files: BuildFileList) {
        if self.is_building() {
            self.pending_build_files.merge(files);
        } else {
            self.build_files.merge(files);
        }
    }

    /// Move pending changes into the next build
    pub fn promote_pending(&mut self) {
        let pending = self.pending_build_files.take();
        self.build_files.merge(pending);
    }

    pub(crate) fn take_build_files(&mut self) -> BuildFileList {
        self.build_files.take()
    }

    pub(crate) fn start(&mut self, build: InFlightBuild) {
        self.in_flight = Some(build);
    }

    pub(crate) fn finish(&mut self) -> Option<InFlightBuild> {
        self.in_flight.take()
    }

    /// Drop every queued change
    pub fn clear_queued(&mut self) {
        self.build_files = BuildFileList::new();
        self.pending_build_files = BuildFileList::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(&str, bool)]) -> BuildFileList {
        entries.iter().map(|(p, f)| (PathBuf::from(p), *f)).collect()
    }

    #[test]
    fn test_insert_merges_force_flag() {
        let mut files = BuildFileList::new();
        files.insert("a.cpp", false);
        files.insert("a.cpp", true);
        files.insert("a.cpp", false);
        assert_eq!(files.len(), 1);
        assert!(files.is_forced(Path::new("a.cpp")));
    }

    #[test]
    fn test_queue_while_building_goes_to_pending() {
        let mut project = Project::new(ProjectId(0), ProjectConfig::new("game"), Vec::new());
        project.queue(list(&[("a.cpp", true)]));
        assert_eq!(project.build_files().len(), 1);

        let files = project.take_build_files();
        project.start(InFlightBuild {
            handle: BuildHandle(0),
            output_path: PathBuf::from("out.so"),
            files,
        });
        project.queue(list(&[("b.cpp", true)]));
        project.queue(list(&[("c.cpp", true), ("b.cpp", false)]));

        assert!(project.build_files().is_empty());
        assert_eq!(project.pending_build_files().len(), 2);

        project.finish();
        project.promote_pending();
        assert!(project.pending_build_files().is_empty());
        let next: Vec<&Path> = project.build_files().paths().collect();
        assert_eq!(next, vec![Path::new("b.cpp"), Path::new("c.cpp")]);
        assert!(project.build_files().is_forced(Path::new("b.cpp")));
    }

    #[test]
    fn test_to_build_files() {
        let files = list(&[("b.cpp", false), ("a.cpp", true)]);
        assert_eq!(
            files.to_build_files(),
            vec![
                BuildFile { path: PathBuf::from("a.cpp"), force_rebuild: true },
                BuildFile { path: PathBuf::from("b.cpp"), force_rebuild: false },
            ]
        );
    }
}

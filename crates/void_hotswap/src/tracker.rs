//! Per-project dependency graph
//!
//! Built entirely from the metadata constructors report about themselves and
//! rebuilt on every load, so it always reflects the code that is running.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::{is_header, SourceRoot};
use crate::constructor::ConstructorInfo;
use crate::project::BuildFileList;

/// Outcome of a tracking refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingUpdate {
    /// Paths that should be watched for changes
    pub tracked: Vec<PathBuf>,
    /// Reported sources that could not be located
    pub missing: Vec<PathBuf>,
}

/// Maps changed files to the sources that must rebuild
#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    header_extensions: Vec<String>,
    /// Sources that define constructors
    runtime_files: BTreeSet<PathBuf>,
    /// header -> sources including it
    include_map: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    /// source -> companion sources built together with it
    source_dependency_map: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    /// source -> libraries it links
    link_library_map: BTreeMap<PathBuf, BTreeSet<String>>,
    /// Reported sources not found on disk
    missing: BTreeSet<PathBuf>,
}

impl DependencyTracker {
    pub fn new(header_extensions: Vec<String>) -> Self {
        Self {
            header_extensions,
            ..Default::default()
        }
    }

    /// Re-derive dependency edges from constructor metadata, replacing every
    /// mapping previously recorded for the same source files.
    pub fn setup_runtime_file_tracking(
        &mut self,
        infos: &[ConstructorInfo],
        source_roots: &[SourceRoot],
    ) -> TrackingUpdate {
        let mut update = TrackingUpdate::default();
        let mut resolved = Vec::with_capacity(infos.len());

        for info in infos {
            let Some(reported) = info.file.as_deref() else {
                continue;
            };
            match locate(reported, source_roots) {
                Some(source) => {
                    self.missing.remove(reported);
                    resolved.push((info, source));
                }
                None => {
                    log::warn!(
                        "Source '{}' of '{}' not found, excluded from tracking",
                        reported.display(),
                        info.name
                    );
                    self.missing.insert(reported.to_path_buf());
                    update.missing.push(reported.to_path_buf());
                }
            }
        }

        // Several constructors may share a file, so clear everything first
        for (_, source) in &resolved {
            self.forget(source);
        }

        for (info, source) in resolved {
            self.runtime_files.insert(source.clone());
            update.tracked.push(source.clone());

            let base = source.parent().map(Path::to_path_buf).unwrap_or_default();
            for header in &info.includes {
                match locate_relative(header, &base, source_roots) {
                    Some(header) => {
                        self.include_map.entry(header.clone()).or_default().insert(source.clone());
                        update.tracked.push(header);
                    }
                    None => log::warn!(
                        "Include '{}' of '{}' not found, excluded from tracking",
                        header.display(),
                        source.display()
                    ),
                }
            }

            for dependency in &info.source_dependencies {
                match locate_relative(dependency, &base, source_roots) {
                    Some(dependency) => {
                        self.source_dependency_map
                            .entry(source.clone())
                            .or_default()
                            .insert(dependency.clone());
                        update.tracked.push(dependency);
                    }
                    None => log::warn!(
                        "Source dependency '{}' of '{}' not found, excluded from tracking",
                        dependency.display(),
                        source.display()
                    ),
                }
            }

            if !info.link_libraries.is_empty() {
                self.link_library_map
                    .entry(source.clone())
                    .or_default()
                    .extend(info.link_libraries.iter().cloned());
            }
        }

        update.tracked.sort();
        update.tracked.dedup();
        update
    }

    /// Drop every edge originating from `source`
    fn forget(&mut self, source: &Path) {
        self.runtime_files.remove(source);
        self.include_map.retain(|_, sources| {
            sources.remove(source);
            !sources.is_empty()
        });
        self.source_dependency_map.remove(source);
        self.link_library_map.remove(source);
    }

    /// Resolve changed paths into the files that must rebuild.
    ///
    /// Headers expand to the sources including them; a tracked source or
    /// companion expands to itself plus every source that depends on it.
    /// Paths outside the graph are ignored.
    pub fn resolve_changes(&self, paths: &[PathBuf]) -> BuildFileList {
        let mut files = BuildFileList::new();

        for changed in paths {
            let path = normalize(changed);

            if is_header(&path, &self.header_extensions) {
                match self.include_map.get(&path) {
                    Some(sources) => {
                        for source in sources {
                            files.insert(source.clone(), true);
                        }
                    }
                    None => log::debug!("Header '{}' not tracked, ignoring", path.display()),
                }
                continue;
            }

            let dependents = self.dependents_of(&path);
            if self.runtime_files.contains(&path) || !dependents.is_empty() {
                files.insert(path.clone(), true);
                for dependent in dependents {
                    files.insert(dependent.to_path_buf(), true);
                }
            } else {
                log::debug!("'{}' not tracked, ignoring", path.display());
            }
        }

        files
    }

    /// Sources that list `path` as a companion
    fn dependents_of(&self, path: &Path) -> Vec<&Path> {
        self.source_dependency_map
            .iter()
            .filter(|(_, companions)| companions.contains(path))
            .map(|(source, _)| source.as_path())
            .collect()
    }

    /// One pass of companion expansion over a build list
    pub fn add_source_dependencies(&self, files: &mut BuildFileList) {
        let companions: Vec<PathBuf> = files
            .paths()
            .filter_map(|path| self.source_dependency_map.get(path))
            .flatten()
            .cloned()
            .collect();
        for companion in companions {
            files.insert(companion, false);
        }
    }

    /// Every library linked by a tracked source
    pub fn link_libraries(&self) -> BTreeSet<String> {
        self.link_library_map.values().flatten().cloned().collect()
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.runtime_files.contains(&path)
            || self.include_map.contains_key(&path)
            || !self.dependents_of(&path).is_empty()
    }

    pub fn runtime_files(&self) -> impl Iterator<Item = &Path> {
        self.runtime_files.iter().map(PathBuf::as_path)
    }

    /// Sources including `header`
    pub fn sources_including(&self, header: &Path) -> Vec<&Path> {
        self.include_map
            .get(&normalize(header))
            .map(|sources| sources.iter().map(PathBuf::as_path).collect())
            .unwrap_or_default()
    }

    pub fn missing(&self) -> impl Iterator<Item = &Path> {
        self.missing.iter().map(PathBuf::as_path)
    }
}

/// Find a reported file on disk, trying source-root remaps when it moved
fn locate(path: &Path, roots: &[SourceRoot]) -> Option<PathBuf> {
    if path.exists() {
        return Some(normalize(path));
    }
    roots
        .iter()
        .filter_map(|root| root.remap(path))
        .find(|candidate| candidate.exists())
        .map(|candidate| normalize(&candidate))
}

/// Like [`locate`], but relative paths are first tried against `base`
fn locate_relative(path: &Path, base: &Path, roots: &[SourceRoot]) -> Option<PathBuf> {
    if path.is_relative() {
        let joined = base.join(path);
        if joined.exists() {
            return Some(normalize(&joined));
        }
    }
    locate(path, roots)
}

/// Canonical form used as map key; paths that no longer exist keep their spelling
fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn headers() -> Vec<String> {
        vec!["h".into(), "hpp".into()]
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, "// source").unwrap();
        fs::canonicalize(path).unwrap()
    }

    fn info(name: &str, file: &Path) -> ConstructorInfo {
        let mut info = ConstructorInfo::new(name);
        info.file = Some(file.to_path_buf());
        info
    }

    #[test]
    fn test_header_resolves_to_including_sources() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.cpp");
        let b = touch(dir.path(), "b.cpp");
        let c = touch(dir.path(), "c.cpp");
        let header = touch(dir.path(), "shared.h");

        let mut ia = info("A", &a);
        ia.includes.push(header.clone());
        let mut ib = info("B", &b);
        ib.includes.push(PathBuf::from("shared.h"));
        let ic = info("C", &c);

        let mut tracker = DependencyTracker::new(headers());
        let update = tracker.setup_runtime_file_tracking(&[ia, ib, ic], &[]);
        assert!(update.missing.is_empty());
        assert!(update.tracked.contains(&header));

        let files = tracker.resolve_changes(&[header]);
        let paths: Vec<&Path> = files.paths().collect();
        assert_eq!(paths.len(), 2);
        assert!(files.is_forced(&a));
        assert!(files.is_forced(&b));
        assert!(!files.contains(&c));
    }

    #[test]
    fn test_untracked_change_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.cpp");
        let stray = touch(dir.path(), "stray.cpp");
        let stray_header = touch(dir.path(), "stray.h");

        let mut tracker = DependencyTracker::new(headers());
        tracker.setup_runtime_file_tracking(&[info("A", &a)], &[]);

        assert!(tracker.resolve_changes(&[stray, stray_header]).is_empty());
        assert!(tracker.resolve_changes(&[dir.path().join("gone.cpp")]).is_empty());
    }

    #[test]
    fn test_source_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.cpp");
        let helper = touch(dir.path(), "helper.cpp");

        let mut ia = info("A", &a);
        ia.source_dependencies.push(helper.clone());
        let mut tracker = DependencyTracker::new(headers());
        tracker.setup_runtime_file_tracking(&[ia], &[]);

        // a changed companion rebuilds its dependents
        let files = tracker.resolve_changes(&[helper.clone()]);
        assert!(files.contains(&helper));
        assert!(files.is_forced(&a));

        // a build of the source pulls its companion in
        let mut files = tracker.resolve_changes(&[a.clone()]);
        assert!(!files.contains(&helper));
        tracker.add_source_dependencies(&mut files);
        assert!(files.contains(&helper));
        assert!(!files.is_forced(&helper));
    }

    #[test]
    fn test_retracking_replaces_stale_edges() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.cpp");
        let old_header = touch(dir.path(), "old.h");
        let new_header = touch(dir.path(), "new.h");

        let mut tracker = DependencyTracker::new(headers());
        let mut first = info("A", &a);
        first.includes.push(old_header.clone());
        first.link_libraries.push("m".into());
        tracker.setup_runtime_file_tracking(&[first], &[]);
        assert_eq!(tracker.sources_including(&old_header), vec![a.as_path()]);

        let mut second = info("A", &a);
        second.includes.push(new_header.clone());
        tracker.setup_runtime_file_tracking(&[second], &[]);

        assert!(tracker.sources_including(&old_header).is_empty());
        assert_eq!(tracker.sources_including(&new_header), vec![a.as_path()]);
        assert!(tracker.link_libraries().is_empty());
    }

    #[test]
    fn test_missing_source_uses_source_roots() {
        let dir = tempfile::tempdir().unwrap();
        let moved = touch(dir.path(), "moved/src/a.cpp");
        let reported = PathBuf::from("/nonexistent/build-machine/src/a.cpp");

        let mut tracker = DependencyTracker::new(headers());
        let update = tracker.setup_runtime_file_tracking(&[info("A", &reported)], &[]);
        assert_eq!(update.missing, vec![reported.clone()]);
        assert_eq!(tracker.missing().count(), 1);
        assert!(tracker.runtime_files().next().is_none());

        let root = SourceRoot::new("/nonexistent/build-machine", dir.path().join("moved"));
        let update = tracker.setup_runtime_file_tracking(&[info("A", &reported)], &[root]);
        assert!(update.missing.is_empty());
        assert_eq!(tracker.missing().count(), 0);
        assert!(tracker.is_tracked(&moved));
    }

    #[test]
    fn test_link_libraries_union() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.cpp");
        let b = touch(dir.path(), "b.cpp");
        let mut ia = info("A", &a);
        ia.link_libraries = vec!["m".into(), "pthread".into()];
        let mut ib = info("B", &b);
        ib.link_libraries = vec!["m".into()];

        let mut tracker = DependencyTracker::new(headers());
        tracker.setup_runtime_file_tracking(&[ia, ib], &[]);
        let libs: Vec<String> = tracker.link_libraries().into_iter().collect();
        assert_eq!(libs, vec!["m".to_string(), "pthread".to_string()]);
    }
}

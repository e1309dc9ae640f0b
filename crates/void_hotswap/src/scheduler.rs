//! Change batching and build sequencing
//!
//! Every project has at most one build in flight. Changes that arrive while it
//! runs accumulate in the project's pending list and are merged into the next
//! build once the current one completes. Builds are polled, never awaited.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::build::{module_file_name, output_is_valid, BuildRequest, BuildTool, CompileOptions};
use crate::config::{ProjectConfig, RuntimeConfig};
use crate::constructor::ConstructorInfo;
use crate::error::{HotSwapError, Result};
use crate::project::{BuildFile, BuildFileList, InFlightBuild, Project, ProjectId};
use crate::tracker::TrackingUpdate;

/// Name of the project used when the configuration declares none
pub const DEFAULT_PROJECT_NAME: &str = "default";

/// Something that happened to a build since the last poll
#[derive(Debug)]
pub enum BuildEvent {
    /// A module was written and is ready to load
    Completed {
        project: ProjectId,
        module_path: PathBuf,
        files: Vec<BuildFile>,
    },
    /// The build could not start, or finished without a usable module
    Failed {
        project: ProjectId,
        error: HotSwapError,
    },
}

/// Drives every project's build pipeline
pub struct ChangeScheduler {
    projects: Vec<Project>,
    bootstrap_files: Vec<PathBuf>,
    intermediate_dir: PathBuf,
    auto_compile: bool,
    build_tool: Box<dyn BuildTool>,
    next_build: u64,
    shutting_down: bool,
}

impl ChangeScheduler {
    /// Create projects from the configuration; one default project when it has none
    pub fn new(config: &RuntimeConfig, build_tool: Box<dyn BuildTool>) -> Self {
        let mut configs = config.projects.clone();
        if configs.is_empty() {
            configs.push(ProjectConfig::new(DEFAULT_PROJECT_NAME));
        }

        let projects = configs
            .into_iter()
            .enumerate()
            .map(|(index, project)| {
                Project::new(ProjectId(index as u16), project, config.header_extensions.clone())
            })
            .collect();

        Self {
            projects,
            bootstrap_files: config.bootstrap_files.clone(),
            intermediate_dir: config.intermediate_dir.clone(),
            auto_compile: config.auto_compile,
            build_tool,
            next_build: 0,
            shutting_down: false,
        }
    }

    // ========== Projects ==========

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(id.index())
    }

    pub fn project_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.projects.get_mut(id.index())
    }

    pub fn project_id(&self, name: &str) -> Option<ProjectId> {
        self.projects.iter().find(|p| p.name() == name).map(Project::id)
    }

    pub fn is_building(&self) -> bool {
        self.projects.iter().any(Project::is_building)
    }

    /// Whether any project has changes waiting for a build
    pub fn has_queued_files(&self) -> bool {
        self.projects
            .iter()
            .any(|p| !p.build_files().is_empty() || !p.pending_build_files().is_empty())
    }

    pub fn set_auto_compile(&mut self, enabled: bool) {
        self.auto_compile = enabled;
    }

    pub fn auto_compile(&self) -> bool {
        self.auto_compile
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutting_down
    }

    // ========== Tracking ==========

    /// Refresh each project's dependency graph from constructor metadata
    pub fn setup_runtime_file_tracking(&mut self, infos: &[ConstructorInfo]) -> TrackingUpdate {
        let mut by_project: HashMap<ProjectId, Vec<ConstructorInfo>> = HashMap::new();
        for info in infos {
            if self.project(info.project).is_some() {
                by_project.entry(info.project).or_default().push(info.clone());
            } else {
                log::warn!(
                    "'{}' belongs to unknown project {:?}, not tracked",
                    info.name,
                    info.project
                );
            }
        }

        let mut update = TrackingUpdate::default();
        for (id, infos) in by_project {
            if let Some(project) = self.projects.get_mut(id.index()) {
                let roots = project.config().source_roots.clone();
                let project_update =
                    project.tracker_mut().setup_runtime_file_tracking(&infos, &roots);
                update.tracked.extend(project_update.tracked);
                update.missing.extend(project_update.missing);
            }
        }
        update.tracked.sort();
        update.tracked.dedup();
        update
    }

    // ========== Queueing ==========

    /// Resolve a batch of changed paths in every project and queue the results.
    ///
    /// Returns the number of files queued, or `NoFilesToBuild` when no project
    /// tracks any of the paths.
    pub fn on_file_change(&mut self, paths: &[PathBuf]) -> Result<usize> {
        if self.shutting_down {
            return Ok(0);
        }

        let mut queued = 0;
        for project in self.projects.iter_mut() {
            let files = project.tracker().resolve_changes(paths);
            if files.is_empty() {
                continue;
            }
            queued += files.len();
            if project.is_building() {
                log::debug!(
                    "Project '{}' is building, {} files wait for the next build",
                    project.name(),
                    files.len()
                );
            }
            project.queue(files);
        }

        if queued == 0 {
            log::info!("Nothing to build for {} changed files", paths.len());
            return Err(HotSwapError::NoFilesToBuild);
        }
        Ok(queued)
    }

    /// Queue every tracked source of every project for a forced rebuild
    pub fn compile_all(&mut self) -> Result<usize> {
        let mut queued = 0;
        for project in self.projects.iter_mut() {
            let files: BuildFileList = project
                .tracker()
                .runtime_files()
                .map(|path| (path.to_path_buf(), true))
                .collect();
            queued += files.len();
            project.queue(files);
        }

        if queued == 0 {
            log::info!("Nothing to build: no tracked sources");
            return Err(HotSwapError::NoFilesToBuild);
        }
        Ok(queued)
    }

    /// Queue one file of a project for a forced rebuild
    pub fn queue_file(&mut self, project: ProjectId, path: impl AsRef<Path>) -> Result<()> {
        let project = self
            .projects
            .get_mut(project.index())
            .ok_or(HotSwapError::ProjectNotFound(project))?;
        let mut files = BuildFileList::new();
        files.insert(path.as_ref(), true);
        project.queue(files);
        Ok(())
    }

    // ========== Pumping ==========

    /// Poll running builds, then start queued ones when auto-compile is on
    pub fn update(&mut self) -> Vec<BuildEvent> {
        let mut events = self.poll_builds();
        if self.auto_compile {
            events.extend(self.start_queued_builds());
        }
        events
    }

    /// Collect finished builds and move pending changes forward
    pub fn poll_builds(&mut self) -> Vec<BuildEvent> {
        let mut events = Vec::new();

        for project in self.projects.iter_mut() {
            let Some(in_flight) = project.in_flight() else {
                continue;
            };
            if !self.build_tool.is_complete(in_flight.handle) {
                continue;
            }
            let Some(build) = project.finish() else {
                continue;
            };

            if output_is_valid(&build.output_path) {
                log::info!(
                    "Build of '{}' finished: {}",
                    project.name(),
                    build.output_path.display()
                );
                events.push(BuildEvent::Completed {
                    project: project.id(),
                    module_path: build.output_path,
                    files: build.files.to_build_files(),
                });
            } else {
                log::error!(
                    "Build of '{}' failed: no module written to {}",
                    project.name(),
                    build.output_path.display()
                );
                remove_output(&build.output_path);
                events.push(BuildEvent::Failed {
                    project: project.id(),
                    error: HotSwapError::build_failed(
                        project.id(),
                        "module output missing or empty",
                    ),
                });
            }

            project.promote_pending();
        }

        events
    }

    /// Start a build for every idle project with queued files
    pub fn start_queued_builds(&mut self) -> Vec<BuildEvent> {
        if self.shutting_down {
            return Vec::new();
        }

        let mut events = Vec::new();
        for index in 0..self.projects.len() {
            let project = &self.projects[index];
            if project.is_building() || project.build_files().is_empty() {
                continue;
            }
            if let Err(error) = self.start_build(index) {
                events.push(BuildEvent::Failed {
                    project: ProjectId(index as u16),
                    error,
                });
            }
        }
        events
    }

    fn start_build(&mut self, index: usize) -> Result<()> {
        let build_number = self.next_build;
        self.next_build += 1;

        let project = &mut self.projects[index];
        let mut files = project.take_build_files();
        for bootstrap in &self.bootstrap_files {
            files.insert(bootstrap.clone(), false);
        }
        project.tracker().add_source_dependencies(&mut files);

        let stem = format!("{}_{}", sanitize(project.name()), build_number);
        let output_path = self.intermediate_dir.join(module_file_name(&stem));
        remove_output(&output_path);

        let request = BuildRequest {
            project: project.id(),
            files: files.to_build_files(),
            options: CompileOptions::from(project.config()),
            link_libraries: project.tracker().link_libraries().into_iter().collect(),
            output_path: output_path.clone(),
        };

        match self.build_tool.build_module(request) {
            Ok(handle) => {
                log::info!(
                    "Building '{}': {} files -> {}",
                    project.name(),
                    files.len(),
                    output_path.display()
                );
                project.start(InFlightBuild {
                    handle,
                    output_path,
                    files,
                });
                Ok(())
            }
            Err(e) => {
                log::error!("Build of '{}' not started: {}", project.name(), e);
                Err(match e {
                    HotSwapError::BuildNotStarted { .. } => e,
                    other => HotSwapError::BuildNotStarted {
                        project: project.id(),
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// Stop accepting changes and abandon running builds
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        for project in self.projects.iter_mut() {
            project.clear_queued();
            if let Some(build) = project.finish() {
                log::debug!("Abandoning running build of '{}'", project.name());
                self.build_tool.abandon(build.handle);
                remove_output(&build.output_path);
            }
        }
        log::debug!("Change scheduler shut down");
    }
}

fn remove_output(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Could not remove '{}': {}", path.display(), e);
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildHandle;

    struct NeverStarts;

    impl BuildTool for NeverStarts {
        fn build_module(&mut self, request: BuildRequest) -> Result<BuildHandle> {
            Err(HotSwapError::BuildNotStarted {
                project: request.project,
                message: "no compiler".into(),
            })
        }

        fn is_complete(&mut self, _handle: BuildHandle) -> bool {
            true
        }
    }

    #[test]
    fn test_default_project() {
        let scheduler = ChangeScheduler::new(&RuntimeConfig::default(), Box::new(NeverStarts));
        assert_eq!(scheduler.projects().len(), 1);
        assert_eq!(scheduler.project_id(DEFAULT_PROJECT_NAME), Some(ProjectId(0)));
        assert!(!scheduler.is_building());
    }

    #[test]
    fn test_nothing_to_build() {
        let mut scheduler = ChangeScheduler::new(&RuntimeConfig::default(), Box::new(NeverStarts));
        assert!(matches!(
            scheduler.on_file_change(&[PathBuf::from("untracked.cpp")]),
            Err(HotSwapError::NoFilesToBuild)
        ));
        assert!(matches!(scheduler.compile_all(), Err(HotSwapError::NoFilesToBuild)));
    }

    #[test]
    fn test_build_not_started_is_reported() {
        let mut scheduler = ChangeScheduler::new(&RuntimeConfig::default(), Box::new(NeverStarts));
        scheduler.queue_file(ProjectId(0), "a.cpp").unwrap();

        let events = scheduler.update();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            BuildEvent::Failed { error: HotSwapError::BuildNotStarted { .. }, .. }
        ));
        assert!(!scheduler.is_building());
    }

    #[test]
    fn test_unknown_project() {
        let mut scheduler = ChangeScheduler::new(&RuntimeConfig::default(), Box::new(NeverStarts));
        assert!(matches!(
            scheduler.queue_file(ProjectId(3), "a.cpp"),
            Err(HotSwapError::ProjectNotFound(_))
        ));
    }

    /// Builds that never finish on their own
    #[derive(Default)]
    struct Endless {
        abandoned: std::sync::Arc<parking_lot::Mutex<Vec<BuildHandle>>>,
    }

    impl BuildTool for Endless {
        fn build_module(&mut self, _request: BuildRequest) -> Result<BuildHandle> {
            Ok(BuildHandle(7))
        }

        fn is_complete(&mut self, _handle: BuildHandle) -> bool {
            false
        }

        fn abandon(&mut self, handle: BuildHandle) {
            self.abandoned.lock().push(handle);
        }
    }

    #[test]
    fn test_shutdown_abandons_running_build() {
        let tool = Endless::default();
        let abandoned = tool.abandoned.clone();
        let mut scheduler = ChangeScheduler::new(&RuntimeConfig::default(), Box::new(tool));
        scheduler.queue_file(ProjectId(0), "a.cpp").unwrap();
        assert!(scheduler.update().is_empty());
        assert!(scheduler.is_building());

        scheduler.shutdown();
        assert_eq!(abandoned.lock().clone(), vec![BuildHandle(7)]);
        assert!(!scheduler.is_building());

        scheduler.shutdown();
        assert_eq!(abandoned.lock().len(), 1);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("my game/tools"), "my_game_tools");
    }
}

//! The runtime object system
//!
//! Owns the registry, the scheduler and the external collaborators, and moves
//! everything forward from [`RuntimeObjectSystem::update`], called once per
//! frame by the host. File changes reported from other threads are queued and
//! only applied inside `update`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::build::BuildTool;
use crate::config::RuntimeConfig;
use crate::constructor::Constructor;
use crate::error::{HotSwapError, ReloadResult, Result};
use crate::loader::{HostServices, ModuleLoader};
use crate::registry::{ConstructorsChangedListener, ObjectRegistry, SwapReport};
use crate::scheduler::{BuildEvent, ChangeScheduler};
use crate::watcher::{ChangeNotifier, FileWatcher};

/// How often `test_build` polls a running build
const TEST_BUILD_POLL: Duration = Duration::from_millis(10);

/// Top-level hot-swap runtime
pub struct RuntimeObjectSystem {
    config: RuntimeConfig,
    registry: ObjectRegistry,
    scheduler: ChangeScheduler,
    loader: Box<dyn ModuleLoader>,
    watcher: Box<dyn FileWatcher>,
    notifier: ChangeNotifier,
    services: HostServices,
    /// Changes waiting out the debounce window
    pending_changes: Vec<PathBuf>,
    quiet_time: f32,
    started: bool,
    shut_down: bool,
    last_result: Option<ReloadResult>,
}

impl RuntimeObjectSystem {
    pub fn new(
        config: RuntimeConfig,
        build_tool: Box<dyn BuildTool>,
        loader: Box<dyn ModuleLoader>,
        watcher: Box<dyn FileWatcher>,
    ) -> Self {
        let scheduler = ChangeScheduler::new(&config, build_tool);
        Self {
            config,
            registry: ObjectRegistry::new(),
            scheduler,
            loader,
            watcher,
            notifier: ChangeNotifier::new(),
            services: HostServices::from_host(),
            pending_changes: Vec::new(),
            quiet_time: 0.0,
            started: false,
            shut_down: false,
            last_result: None,
        }
    }

    /// Runtime wired to the child-process compiler, the OS loader and OS file watching
    #[cfg(feature = "hot-reload")]
    pub fn with_defaults(config: RuntimeConfig, compiler: impl Into<PathBuf>) -> Result<Self> {
        use crate::build::ProcessBuildTool;
        use crate::loader::DynamicModuleLoader;
        use crate::watcher::NotifyFileWatcher;

        Ok(Self::new(
            config,
            Box::new(ProcessBuildTool::new(compiler)),
            Box::new(DynamicModuleLoader::new()),
            Box::new(NotifyFileWatcher::new()?),
        ))
    }

    /// Services handed to every loaded module
    pub fn with_services(mut self, services: HostServices) -> Self {
        self.services = services;
        self
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.registry
    }

    pub fn scheduler(&self) -> &ChangeScheduler {
        &self.scheduler
    }

    /// Handle for reporting changed files from any thread
    pub fn notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }

    pub fn is_compiling(&self) -> bool {
        self.scheduler.is_building()
    }

    pub fn last_result(&self) -> Option<ReloadResult> {
        self.last_result
    }

    pub fn set_auto_compile(&mut self, enabled: bool) {
        self.config.auto_compile = enabled;
        self.scheduler.set_auto_compile(enabled);
    }

    pub fn on_constructors_changed(&mut self, listener: ConstructorsChangedListener) {
        self.registry.on_constructors_changed(listener);
    }

    // ========== Loading ==========

    /// Install constructors, swapping same-named types, and refresh tracking
    /// for every constructor the swap touched.
    pub fn add_constructors(
        &mut self,
        constructors: Vec<Box<dyn Constructor>>,
    ) -> Result<SwapReport> {
        let report = self.registry.add_constructors(constructors)?;

        let infos = self.registry.constructor_infos(report.changed());
        let update = self.scheduler.setup_runtime_file_tracking(&infos);
        if !self.shut_down {
            for path in &update.tracked {
                if let Err(e) = self.watcher.watch(path) {
                    log::warn!("Cannot watch '{}': {}", path.display(), e);
                }
            }
        }

        Ok(report)
    }

    /// Load a built module and swap in its constructors
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> Result<SwapReport> {
        let path = path.as_ref();
        let constructors = self.loader.load_module(path, &self.services)?;
        self.add_constructors(constructors)
    }

    // ========== Pumping ==========

    /// Queue changed paths for resolution, bypassing the watcher and debounce
    pub fn on_file_change(&mut self, paths: &[PathBuf]) -> Result<usize> {
        self.scheduler.on_file_change(paths)
    }

    /// Advance the runtime by one frame.
    ///
    /// Returns the result of every reload attempt that finished during this
    /// call, in completion order.
    pub fn update(&mut self, delta_time: f32) -> Vec<ReloadResult> {
        if self.shut_down {
            // Completions after shutdown are discarded inside the scheduler
            self.scheduler.poll_builds();
            return Vec::new();
        }

        let mut results = Vec::new();

        if !self.started {
            self.started = true;
            if self.config.compile_all_on_start {
                if let Err(e) = self.scheduler.compile_all() {
                    results.push(self.record(e.reload_result()));
                }
            }
        }

        let mut incoming = self.watcher.poll_changes();
        incoming.extend(self.notifier.take());
        if !incoming.is_empty() {
            self.pending_changes.extend(incoming);
            self.quiet_time = 0.0;
        } else if !self.pending_changes.is_empty() {
            self.quiet_time += delta_time.max(0.0);
        }

        if !self.pending_changes.is_empty() && self.quiet_time >= self.config.debounce_seconds {
            let mut batch = std::mem::take(&mut self.pending_changes);
            batch.sort();
            batch.dedup();
            if let Err(e) = self.scheduler.on_file_change(&batch) {
                results.push(self.record(e.reload_result()));
            }
        }

        for event in self.scheduler.update() {
            results.push(self.handle_build_event(event));
        }
        results
    }

    fn handle_build_event(&mut self, event: BuildEvent) -> ReloadResult {
        let result = match event {
            BuildEvent::Completed {
                project,
                module_path,
                ..
            } => match self.load_module(&module_path) {
                Ok(report) => {
                    log::info!(
                        "Reloaded project {:?}: {} types swapped, {} added",
                        project,
                        report.swapped.len(),
                        report.added.len()
                    );
                    ReloadResult::Success
                }
                Err(e) => {
                    log::error!("Reload of project {:?} failed: {}", project, e);
                    e.reload_result()
                }
            },
            BuildEvent::Failed { error, .. } => error.reload_result(),
        };
        self.record(result)
    }

    fn record(&mut self, result: ReloadResult) -> ReloadResult {
        self.last_result = Some(result);
        result
    }

    /// Force every tracked source into a build and start it
    pub fn compile_all(&mut self) -> Result<usize> {
        let queued = self.scheduler.compile_all()?;
        for event in self.scheduler.start_queued_builds() {
            if let BuildEvent::Failed { error, .. } = event {
                self.record(error.reload_result());
                return Err(error);
            }
        }
        Ok(queued)
    }

    /// Force a rebuild of one file and block until the resulting swap has
    /// been applied, polling every few milliseconds.
    pub fn test_build(&mut self, path: impl AsRef<Path>, timeout: Duration) -> ReloadResult {
        let path = path.as_ref();
        if !path.exists() {
            let error = HotSwapError::FileGone(path.to_path_buf());
            log::warn!("Test build failed: {}", error);
            return self.record(error.reload_result());
        }

        if let Err(e) = self.scheduler.on_file_change(&[path.to_path_buf()]) {
            return self.record(e.reload_result());
        }

        let deadline = Instant::now() + timeout;
        let mut outcome = None;
        loop {
            let mut events = self.scheduler.poll_builds();
            events.extend(self.scheduler.start_queued_builds());
            for event in events {
                let result = self.handle_build_event(event);
                if !result.is_success() {
                    return result;
                }
                outcome = Some(result);
            }

            if !self.scheduler.is_building() && !self.scheduler.has_queued_files() {
                return self.record(outcome.unwrap_or(ReloadResult::NoFilesToBuild));
            }

            if Instant::now() >= deadline {
                log::error!("Test build of '{}' timed out after {:?}", path.display(), timeout);
                return self.record(ReloadResult::BuildFailed);
            }
            std::thread::sleep(TEST_BUILD_POLL);
        }
    }

    /// Stop watching files. Builds still running are discarded when they complete.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.watcher.unwatch_all();
        self.notifier.take();
        self.pending_changes.clear();
        self.scheduler.shutdown();
        log::info!("Runtime object system shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for RuntimeObjectSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RuntimeObjectSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeObjectSystem")
            .field("constructors", &self.registry.constructor_count())
            .field("objects", &self.registry.object_count())
            .field("compiling", &self.scheduler.is_building())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

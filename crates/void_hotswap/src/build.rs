//! Build tool boundary
//!
//! A [`BuildTool`] compiles one module asynchronously and is polled for
//! completion from the update pump; it is never awaited. Success is judged by
//! the caller from the output file: missing or empty means the build failed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::config::{OptimizationLevel, ProjectConfig};
use crate::error::{HotSwapError, Result};
use crate::project::{BuildFile, ProjectId};

/// Opaque handle to a started build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildHandle(pub u64);

/// Compiler settings forwarded from the project configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompileOptions {
    pub include_dirs: Vec<PathBuf>,
    pub library_dirs: Vec<PathBuf>,
    pub optimization: OptimizationLevel,
    pub flags: String,
    pub compiler: Option<PathBuf>,
}

impl From<&ProjectConfig> for CompileOptions {
    fn from(config: &ProjectConfig) -> Self {
        Self {
            include_dirs: config.include_dirs.clone(),
            library_dirs: config.library_dirs.clone(),
            optimization: config.optimization.resolve(),
            flags: config.compile_options.clone(),
            compiler: config.compiler.clone(),
        }
    }
}

/// Everything needed to build one module
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub project: ProjectId,
    pub files: Vec<BuildFile>,
    pub options: CompileOptions,
    pub link_libraries: Vec<String>,
    pub output_path: PathBuf,
}

/// Compiles modules in the background
pub trait BuildTool: Send {
    /// Start building; returns immediately
    fn build_module(&mut self, request: BuildRequest) -> Result<BuildHandle>;

    /// Poll a started build
    fn is_complete(&mut self, handle: BuildHandle) -> bool;

    /// Stop tracking a build whose result is no longer wanted
    fn abandon(&mut self, _handle: BuildHandle) {}
}

struct RunningBuild {
    child: Child,
    output_path: PathBuf,
    log_path: PathBuf,
}

/// Runs the project's compiler as a child process.
///
/// The command line is `<compiler> <flags> -I<dir>... -L<dir>... -l<lib>...
/// -o <output> <files>...` plus an optimisation flag, with each file passed by
/// path. Compilers with other conventions can be wrapped in a script.
pub struct ProcessBuildTool {
    default_compiler: PathBuf,
    next_handle: u64,
    running: HashMap<BuildHandle, RunningBuild>,
}

impl ProcessBuildTool {
    pub fn new(default_compiler: impl Into<PathBuf>) -> Self {
        Self {
            default_compiler: default_compiler.into(),
            next_handle: 0,
            running: HashMap::new(),
        }
    }

    /// Number of builds not yet reported complete
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    fn command(&self, request: &BuildRequest, log_file: &std::fs::File) -> Result<Command> {
        let options = &request.options;
        let compiler = options.compiler.as_deref().unwrap_or(self.default_compiler.as_path());

        let mut command = Command::new(compiler);
        command.args(options.flags.split_whitespace());
        match options.optimization {
            OptimizationLevel::Debug => {
                command.arg("-O0").arg("-g");
            }
            OptimizationLevel::Perf => {
                command.arg("-O2");
            }
            OptimizationLevel::Default | OptimizationLevel::NotSet => {}
        }
        for dir in &options.include_dirs {
            command.arg(format!("-I{}", dir.display()));
        }
        for dir in &options.library_dirs {
            command.arg(format!("-L{}", dir.display()));
        }
        command.arg("-o").arg(&request.output_path);
        for file in &request.files {
            command.arg(&file.path);
        }
        for library in &request.link_libraries {
            command.arg(format!("-l{}", library));
        }
        // Compiler output goes to a file so a chatty build never blocks on a full pipe
        command
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file.try_clone()?));
        Ok(command)
    }

    fn report(handle: BuildHandle, build: &RunningBuild, status: Option<std::process::ExitStatus>) {
        if let Ok(output) = std::fs::read_to_string(&build.log_path) {
            for line in output.lines() {
                log::info!("[build {}] {}", handle.0, line);
            }
        }
        let _ = std::fs::remove_file(&build.log_path);

        if let Some(status) = status.filter(|status| !status.success()) {
            log::warn!(
                "Build {} for '{}' exited with {}",
                handle.0,
                build.output_path.display(),
                status
            );
        }
    }
}

impl BuildTool for ProcessBuildTool {
    fn build_module(&mut self, request: BuildRequest) -> Result<BuildHandle> {
        if let Some(parent) = request.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let log_path = request.output_path.with_extension("log");
        let log_file = std::fs::File::create(&log_path)?;
        let child = self
            .command(&request, &log_file)?
            .spawn()
            .map_err(|e| {
                let _ = std::fs::remove_file(&log_path);
                HotSwapError::BuildNotStarted {
                    project: request.project,
                    message: e.to_string(),
                }
            })?;

        let handle = BuildHandle(self.next_handle);
        self.next_handle += 1;
        log::debug!(
            "Spawned build {} ({} files) -> {}",
            handle.0,
            request.files.len(),
            request.output_path.display()
        );

        self.running.insert(
            handle,
            RunningBuild {
                child,
                output_path: request.output_path,
                log_path,
            },
        );
        Ok(handle)
    }

    fn is_complete(&mut self, handle: BuildHandle) -> bool {
        let status = match self.running.get_mut(&handle) {
            Some(build) => match build.child.try_wait() {
                Ok(Some(status)) => Some(status),
                Ok(None) => return false,
                Err(e) => {
                    log::error!("Lost track of build {}: {}", handle.0, e);
                    None
                }
            },
            // Unknown handles never block the pipeline
            None => return true,
        };

        if let Some(build) = self.running.remove(&handle) {
            Self::report(handle, &build, status);
        }
        true
    }

    fn abandon(&mut self, handle: BuildHandle) {
        if let Some(mut build) = self.running.remove(&handle) {
            let _ = build.child.kill();
            let _ = build.child.wait();
            let _ = std::fs::remove_file(&build.log_path);
        }
    }
}

impl Drop for ProcessBuildTool {
    fn drop(&mut self) {
        let handles: Vec<BuildHandle> = self.running.keys().copied().collect();
        for handle in handles {
            self.abandon(handle);
        }
    }
}

/// Whether a finished build produced a usable module
pub fn output_is_valid(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Platform file name of a module built from `stem`
pub fn module_file_name(stem: &str) -> String {
    format!("{}{}{}", std::env::consts::DLL_PREFIX, stem, std::env::consts::DLL_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_output_validity() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.so");
        let empty = dir.path().join("empty.so");
        let full = dir.path().join("full.so");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"\x7fELF").unwrap();

        assert!(!output_is_valid(&missing));
        assert!(!output_is_valid(&empty));
        assert!(output_is_valid(&full));
        assert!(!output_is_valid(dir.path()));
    }

    #[test]
    fn test_module_file_name() {
        let name = module_file_name("game_3");
        assert!(name.contains("game_3"));
        assert!(name.ends_with(std::env::consts::DLL_SUFFIX));
    }

    #[test]
    fn test_compile_options_from_project() {
        let project = ProjectConfig::new("game")
            .with_include_dir("include")
            .with_optimization(OptimizationLevel::Perf);
        let options = CompileOptions::from(&project);
        assert_eq!(options.include_dirs, vec![PathBuf::from("include")]);
        assert_eq!(options.optimization, OptimizationLevel::Perf);
    }

    #[test]
    fn test_missing_compiler_does_not_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = ProcessBuildTool::new(dir.path().join("no-such-compiler"));
        let request = BuildRequest {
            project: ProjectId(0),
            files: Vec::new(),
            options: CompileOptions::default(),
            link_libraries: Vec::new(),
            output_path: dir.path().join("out").join("game.so"),
        };

        let err = tool.build_module(request).unwrap_err();
        assert!(matches!(err, HotSwapError::BuildNotStarted { .. }));
        assert_eq!(tool.running_count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_is_polled() {
        let dir = tempfile::tempdir().unwrap();
        let mut tool = ProcessBuildTool::new("true");
        let request = BuildRequest {
            project: ProjectId(0),
            files: Vec::new(),
            options: CompileOptions::default(),
            link_libraries: Vec::new(),
            output_path: dir.path().join("game.so"),
        };

        let handle = tool.build_module(request).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while !tool.is_complete(handle) {
            assert!(Instant::now() < deadline, "build never completed");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(tool.running_count(), 0);
        // `true` writes nothing, so the build counts as failed
        assert!(!output_is_valid(&dir.path().join("game.so")));
    }
}

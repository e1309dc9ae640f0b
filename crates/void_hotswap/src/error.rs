//! Error types for the hot-swap system

use std::path::PathBuf;
use thiserror::Error;
use void_core::ConstructorId;

use crate::fault::SwapPhase;
use crate::project::ProjectId;

/// Result type for hot-swap operations
pub type Result<T> = std::result::Result<T, HotSwapError>;

/// Closed set of outcomes reported for one reload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadResult {
    Success,
    NoFilesToBuild,
    FileGone,
    BuildNotStarted,
    BuildFailed,
    ObjectSwapFail,
}

impl ReloadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ReloadResult::Success)
    }
}

/// Errors that can occur while tracking, building, loading or swapping code
#[derive(Debug, Error)]
pub enum HotSwapError {
    /// No constructor registered under this id
    #[error("Constructor {0:?} not registered")]
    ConstructorNotFound(ConstructorId),

    /// No constructor registered under this type name
    #[error("Type '{0}' not registered")]
    TypeNotFound(String),

    /// A swap was requested while another one is running
    #[error("A swap is already in progress")]
    SwapInProgress,

    /// Construct, Load or Init faulted; the previous code and state were restored
    #[error("Object swap failed during {phase}{}: {message}", constructor_suffix(.constructor))]
    SwapFailed {
        phase: SwapPhase,
        constructor: Option<String>,
        /// Source file of the faulting type
        file: Option<PathBuf>,
        message: String,
    },

    /// The module could not be mapped into the process
    #[error("Failed to load module '{path}': {message}")]
    ModuleLoad {
        path: PathBuf,
        message: String,
    },

    /// Module does not export the entry point
    #[error("Symbol '{symbol}' not found in module '{module}'")]
    SymbolNotFound {
        module: String,
        symbol: String,
    },

    #[error("Nothing to build")]
    NoFilesToBuild,

    /// A tracked file disappeared from disk
    #[error("File '{0}' no longer exists")]
    FileGone(PathBuf),

    /// The build tool refused to start
    #[error("Build for project {project:?} not started: {message}")]
    BuildNotStarted {
        project: ProjectId,
        message: String,
    },

    /// Compile or link failed; the output module is missing or empty
    #[error("Build for project {project:?} failed: {message}")]
    BuildFailed {
        project: ProjectId,
        message: String,
    },

    #[error("Project {0:?} not found")]
    ProjectNotFound(ProjectId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn constructor_suffix(constructor: &Option<String>) -> String {
    match constructor {
        Some(name) => format!(" of '{}'", name),
        None => String::new(),
    }
}

impl HotSwapError {
    /// Create a module load error
    pub fn module_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        HotSwapError::ModuleLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a symbol not found error
    pub fn symbol_not_found(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        HotSwapError::SymbolNotFound {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    /// Create a build failed error
    pub fn build_failed(project: ProjectId, message: impl Into<String>) -> Self {
        HotSwapError::BuildFailed {
            project,
            message: message.into(),
        }
    }

    /// The result code reported for this error
    pub fn reload_result(&self) -> ReloadResult {
        match self {
            HotSwapError::NoFilesToBuild => ReloadResult::NoFilesToBuild,
            HotSwapError::FileGone(_) => ReloadResult::FileGone,
            HotSwapError::BuildNotStarted { .. } | HotSwapError::ProjectNotFound(_) => {
                ReloadResult::BuildNotStarted
            }
            HotSwapError::SwapFailed { .. }
            | HotSwapError::SwapInProgress
            | HotSwapError::ConstructorNotFound(_)
            | HotSwapError::TypeNotFound(_) => ReloadResult::ObjectSwapFail,
            HotSwapError::BuildFailed { .. }
            | HotSwapError::ModuleLoad { .. }
            | HotSwapError::SymbolNotFound { .. }
            | HotSwapError::Config(_)
            | HotSwapError::Watch(_)
            | HotSwapError::Io(_) => ReloadResult::BuildFailed,
        }
    }
}

impl From<HotSwapError> for ReloadResult {
    fn from(error: HotSwapError) -> Self {
        error.reload_result()
    }
}

impl From<Result<()>> for ReloadResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => ReloadResult::Success,
            Err(e) => e.reload_result(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        let err = HotSwapError::SwapFailed {
            phase: SwapPhase::Init,
            constructor: Some("Counter".into()),
            file: None,
            message: "boom".into(),
        };
        assert_eq!(err.reload_result(), ReloadResult::ObjectSwapFail);
        assert_eq!(err.to_string(), "Object swap failed during init of 'Counter': boom");

        assert_eq!(HotSwapError::NoFilesToBuild.reload_result(), ReloadResult::NoFilesToBuild);
        assert_eq!(
            HotSwapError::module_load("game.so", "bad").reload_result(),
            ReloadResult::BuildFailed
        );
        assert_eq!(ReloadResult::from(Ok(())), ReloadResult::Success);
    }
}

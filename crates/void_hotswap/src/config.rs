//! Runtime configuration
//!
//! Loaded from TOML by the host and handed to the build tool untouched; the
//! runtime itself only reads the scheduling switches and the header list.
//!
//! ```toml
//! auto_compile = true
//! debounce_seconds = 0.25
//! bootstrap_files = ["src/module_main.rs"]
//!
//! [[projects]]
//! name = "game"
//! optimization = "debug"
//! include_dirs = ["include"]
//! source_roots = [{ from = "/build/machine/src", to = "src" }]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HotSwapError, Result};

/// Optimisation level requested from the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    /// Debug in debug hosts, perf in release hosts
    #[default]
    Default,
    Debug,
    Perf,
    /// Leave the flag out entirely
    NotSet,
}

impl OptimizationLevel {
    /// Resolve `Default` against how the host was built
    pub fn resolve(self) -> Self {
        match self {
            OptimizationLevel::Default if cfg!(debug_assertions) => OptimizationLevel::Debug,
            OptimizationLevel::Default => OptimizationLevel::Perf,
            other => other,
        }
    }
}

/// Prefix remap used to find sources that moved since the module was built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRoot {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl SourceRoot {
    pub fn new(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Remap `path` if it lives under `from`
    pub fn remap(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.from).ok().map(|rest| self.to.join(rest))
    }
}

/// Settings of one independently built project
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub include_dirs: Vec<PathBuf>,
    pub library_dirs: Vec<PathBuf>,
    pub optimization: OptimizationLevel,
    /// Free-form compiler flags
    pub compile_options: String,
    /// Compiler executable; the build tool picks one when unset
    pub compiler: Option<PathBuf>,
    pub source_roots: Vec<SourceRoot>,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dirs.push(dir.into());
        self
    }

    pub fn with_source_root(mut self, root: SourceRoot) -> Self {
        self.source_roots.push(root);
        self
    }

    pub fn with_optimization(mut self, optimization: OptimizationLevel) -> Self {
        self.optimization = optimization;
        self
    }
}

/// Top-level runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Start builds automatically when tracked files change
    pub auto_compile: bool,
    /// Build every tracked source once after startup
    pub compile_all_on_start: bool,
    /// Quiet period before a change batch is applied
    pub debounce_seconds: f32,
    /// Where build outputs are written
    pub intermediate_dir: PathBuf,
    /// Extensions that mark a file as a header
    pub header_extensions: Vec<String>,
    /// Sources appended to every build
    pub bootstrap_files: Vec<PathBuf>,
    pub projects: Vec<ProjectConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_compile: true,
            compile_all_on_start: false,
            debounce_seconds: 0.1,
            intermediate_dir: std::env::temp_dir().join("void_hotswap"),
            header_extensions: ["h", "hpp", "hh", "hxx", "inl"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            bootstrap_files: Vec::new(),
            projects: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parse from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(content).map_err(|e| HotSwapError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HotSwapError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if !self.debounce_seconds.is_finite() || self.debounce_seconds < 0.0 {
            return Err(HotSwapError::Config(format!(
                "debounce_seconds must be a non-negative number, got {}",
                self.debounce_seconds
            )));
        }

        let mut names = std::collections::HashSet::new();
        for project in &self.projects {
            if !names.insert(project.name.as_str()) {
                return Err(HotSwapError::Config(format!(
                    "Project '{}' declared twice",
                    project.name
                )));
            }
        }
        Ok(())
    }

    pub fn with_project(mut self, project: ProjectConfig) -> Self {
        self.projects.push(project);
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs_f32(self.debounce_seconds.max(0.0))
    }

    /// Whether a path names a header, which is never compiled directly
    pub fn is_header(&self, path: &Path) -> bool {
        is_header(path, &self.header_extensions)
    }
}

pub(crate) fn is_header(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|h| h.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.auto_compile);
        assert!(!config.compile_all_on_start);
        assert!(config.is_header(Path::new("include/counter.hpp")));
        assert!(config.is_header(Path::new("include/counter.H")));
        assert!(!config.is_header(Path::new("src/counter.cpp")));
        assert!(!config.is_header(Path::new("Makefile")));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            auto_compile = false
            debounce_seconds = 0.5
            bootstrap_files = ["src/entry.cpp"]

            [[projects]]
            name = "game"
            optimization = "not_set"
            include_dirs = ["include"]
            source_roots = [{ from = "/old/src", to = "src" }]

            [[projects]]
            name = "tools"
        "#;

        let config = RuntimeConfig::from_toml_str(toml).unwrap();
        assert!(!config.auto_compile);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.bootstrap_files, vec![PathBuf::from("src/entry.cpp")]);
        assert_eq!(config.projects.len(), 2);
        assert_eq!(config.projects[0].optimization, OptimizationLevel::NotSet);
        assert_eq!(config.projects[1].optimization, OptimizationLevel::Default);
        assert_eq!(
            config.projects[0].source_roots[0].remap(Path::new("/old/src/a.cpp")),
            Some(PathBuf::from("src/a.cpp"))
        );
        // unspecified fields fall back to defaults
        assert_eq!(config.header_extensions.len(), 5);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("debounce_seconds = -1.0"),
            Err(HotSwapError::Config(_))
        ));
        assert!(RuntimeConfig::from_toml_str("auto_compile = \"yes\"").is_err());

        let duplicated = "[[projects]]\nname = \"a\"\n[[projects]]\nname = \"a\"\n";
        assert!(RuntimeConfig::from_toml_str(duplicated).is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = RuntimeConfig::default()
            .with_project(ProjectConfig::new("game").with_optimization(OptimizationLevel::Perf));
        let text = config.to_toml_string().unwrap();
        assert_eq!(RuntimeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_resolve_optimization() {
        assert_ne!(OptimizationLevel::Default.resolve(), OptimizationLevel::Default);
        assert_eq!(OptimizationLevel::NotSet.resolve(), OptimizationLevel::NotSet);
    }
}

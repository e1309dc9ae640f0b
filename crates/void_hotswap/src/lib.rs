//! # void_hotswap - Live Native Code Swapping
//!
//! Recompiles changed sources into a fresh module while the host keeps
//! running, loads it, and migrates every live object into an instance of the
//! new code. Object ids survive the swap, so handles held elsewhere stay valid.
//! Any fault in the new code rolls the whole swap back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │   FileWatcher   │────▶│ ChangeScheduler │  per-project dependency
//! │ (notify / mem)  │     │ DependencyTracker│  graph, pending lists
//! └─────────────────┘     └────────┬────────┘
//!                                  │ BuildRequest
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  ModuleLoader   │◀────│    BuildTool    │  polled, never awaited
//! │  (libloading)   │     │ (child process) │
//! └────────┬────────┘     └─────────────────┘
//!          │ constructors
//!          ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ ObjectRegistry  │────▶│SerializedValue- │  dump ─ construct ─ load
//! │ (swap protocol) │     │     Store       │  ─ init ─ commit/rollback
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use void_hotswap::prelude::*;
//!
//! let config = RuntimeConfig::load("hotswap.toml")?;
//! let mut runtime = RuntimeObjectSystem::with_defaults(config, "cc")?;
//! runtime.load_module("target/game.so")?;
//! let counter = runtime.registry_mut().construct_by_name("Counter")?;
//!
//! loop {
//!     for result in runtime.update(delta_time) {
//!         log::info!("reload finished: {:?}", result);
//!     }
//!     // `counter` still resolves after every successful swap
//!     let object = runtime.registry().get(counter);
//! }
//! ```

pub mod build;
pub mod config;
pub mod constructor;
pub mod error;
pub mod fault;
pub mod loader;
pub mod object;
pub mod project;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod system;
pub mod tracker;
pub mod watcher;

pub use build::{BuildHandle, BuildRequest, BuildTool, CompileOptions, ProcessBuildTool};
pub use config::{OptimizationLevel, ProjectConfig, RuntimeConfig, SourceRoot};
pub use constructor::{Constructor, ConstructorInfo, ObjectConstructor};
pub use error::{HotSwapError, ReloadResult, Result};
pub use fault::{run_protected, Fault, SwapPhase};
pub use loader::{DynamicModuleLoader, HostServices, ModuleDescriptor, ModuleLoader, StaticModule};
pub use object::{DestroyReason, Object};
pub use project::{BuildFile, BuildFileList, Project, ProjectId};
pub use registry::{ObjectRegistry, SwapReport};
pub use scheduler::{BuildEvent, ChangeScheduler};
pub use store::{SerializedValueStore, StoreMode};
pub use system::RuntimeObjectSystem;
pub use tracker::DependencyTracker;
pub use watcher::{ChangeNotifier, FileWatcher, MemoryFileWatcher};

#[cfg(feature = "hot-reload")]
pub use watcher::NotifyFileWatcher;

pub use void_core;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ProjectConfig, RuntimeConfig};
    pub use crate::constructor::{Constructor, ObjectConstructor};
    pub use crate::error::{HotSwapError, ReloadResult, Result};
    pub use crate::object::{DestroyReason, Object};
    pub use crate::registry::ObjectRegistry;
    pub use crate::store::SerializedValueStore;
    pub use crate::system::RuntimeObjectSystem;
    pub use void_core::prelude::*;

    #[cfg(feature = "hot-reload")]
    pub use crate::watcher::NotifyFileWatcher;
}

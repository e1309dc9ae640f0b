//! Loading freshly built modules
//!
//! A module exports one entry point, [`MODULE_ENTRY_SYMBOL`], returning a
//! [`ModuleDescriptor`]. The host hands the descriptor its [`HostServices`]
//! and then takes the module's constructors. Module authors write:
//!
//! ```ignore
//! fn constructors() -> Vec<Box<dyn Constructor>> {
//!     vec![Box::new(ObjectConstructor::new("Counter", Counter::new).with_file(file!()))]
//! }
//!
//! void_hotswap::export_module!(constructors);
//! ```
//!
//! Host and module must be built by the same compiler against the same
//! version of this crate; the entry point uses the Rust ABI.
//!
//! Loaded libraries are never unloaded. Retired constructors and their
//! vtables live in the image, so it stays mapped until process exit.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::constructor::Constructor;
use crate::error::{HotSwapError, Result};
use crate::fault::panic_message;

/// Name of the symbol every module exports
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"void_hotswap_module\0";

/// Signature of the exported entry point
pub type ModuleEntryFn = fn() -> Box<dyn ModuleDescriptor>;

/// Services the host injects into each module.
///
/// A module does not share the host's statics, so anything it needs from the
/// host arrives through here and is kept by the module's descriptor.
#[derive(Clone, Copy)]
pub struct HostServices {
    pub logger: Option<&'static dyn log::Log>,
    pub max_level: log::LevelFilter,
}

impl HostServices {
    /// Services backed by the host's installed logger
    pub fn from_host() -> Self {
        Self {
            logger: Some(log::logger()),
            max_level: log::max_level(),
        }
    }

    /// No logging inside modules
    pub fn silent() -> Self {
        Self {
            logger: None,
            max_level: log::LevelFilter::Off,
        }
    }

    /// Route this image's `log` macros to the host's logger.
    ///
    /// Inside a separately loaded module this sets the module's own copy of
    /// the `log` statics; when host and module share one image the host's
    /// logger is already installed and nothing changes.
    pub fn install_logger(&self) {
        if let Some(logger) = self.logger {
            if log::set_logger(logger).is_ok() {
                log::set_max_level(self.max_level);
            }
        }
    }
}

impl Default for HostServices {
    fn default() -> Self {
        Self::from_host()
    }
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("logger", &self.logger.is_some())
            .field("max_level", &self.max_level)
            .finish()
    }
}

/// Per-module registration entry
pub trait ModuleDescriptor {
    /// Called once, before any constructor is requested
    fn set_host_services(&mut self, services: HostServices);

    /// Hand over one constructor per type the module defines
    fn take_constructors(&mut self) -> Vec<Box<dyn Constructor>>;
}

/// Descriptor built by [`export_module!`] around a constructor list function
pub struct StaticModule {
    build: fn() -> Vec<Box<dyn Constructor>>,
    services: Option<HostServices>,
}

impl StaticModule {
    pub fn new(build: fn() -> Vec<Box<dyn Constructor>>) -> Self {
        Self { build, services: None }
    }

    /// Services received from the host
    pub fn services(&self) -> Option<&HostServices> {
        self.services.as_ref()
    }
}

impl ModuleDescriptor for StaticModule {
    fn set_host_services(&mut self, services: HostServices) {
        services.install_logger();
        self.services = Some(services);
    }

    fn take_constructors(&mut self) -> Vec<Box<dyn Constructor>> {
        (self.build)()
    }
}

/// Export a module entry point around a `fn() -> Vec<Box<dyn Constructor>>`
#[macro_export]
macro_rules! export_module {
    ($constructors:path) => {
        #[no_mangle]
        pub fn void_hotswap_module() -> ::std::boxed::Box<dyn $crate::loader::ModuleDescriptor> {
            ::std::boxed::Box::new($crate::loader::StaticModule::new($constructors))
        }
    };
}

/// Turns a built module file into constructors
pub trait ModuleLoader {
    fn load_module(
        &mut self,
        path: &Path,
        services: &HostServices,
    ) -> Result<Vec<Box<dyn Constructor>>>;
}

/// Run a module's descriptor, containing panics from its code
pub fn load_from_entry(
    entry: ModuleEntryFn,
    module: &Path,
    services: &HostServices,
) -> Result<Vec<Box<dyn Constructor>>> {
    let services = *services;
    panic::catch_unwind(AssertUnwindSafe(|| {
        let mut descriptor = entry();
        descriptor.set_host_services(services);
        descriptor.take_constructors()
    }))
    .map_err(|payload| HotSwapError::module_load(module, panic_message(payload.as_ref())))
}

struct LoadedModule {
    path: PathBuf,
    library: Library,
}

/// Loads modules with the OS dynamic loader
pub struct DynamicModuleLoader {
    modules: Vec<LoadedModule>,
}

impl DynamicModuleLoader {
    pub fn new() -> Self {
        Self { modules: Vec::new() }
    }

    pub fn loaded_modules(&self) -> impl Iterator<Item = &Path> {
        self.modules.iter().map(|m| m.path.as_path())
    }
}

impl Default for DynamicModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for DynamicModuleLoader {
    fn load_module(
        &mut self,
        path: &Path,
        services: &HostServices,
    ) -> Result<Vec<Box<dyn Constructor>>> {
        // Safety: running a module's initialisers is inherent to hot-swapping
        // native code; the module was produced by our own build pipeline
        let library = unsafe { Library::new(path) }
            .map_err(|e| HotSwapError::module_load(path, e.to_string()))?;

        let entry: ModuleEntryFn = unsafe {
            let symbol: Symbol<ModuleEntryFn> = library.get(MODULE_ENTRY_SYMBOL).map_err(|_| {
                HotSwapError::symbol_not_found(path.display().to_string(), "void_hotswap_module")
            })?;
            *symbol
        };

        // Keep the image mapped before any of its code runs
        self.modules.push(LoadedModule {
            path: path.to_path_buf(),
            library,
        });

        let constructors = load_from_entry(entry, path, services)?;
        log::info!(
            "Loaded module '{}' with {} constructors",
            path.display(),
            constructors.len()
        );
        Ok(constructors)
    }
}

impl Drop for DynamicModuleLoader {
    fn drop(&mut self) {
        // Objects built by these images may outlive the loader
        for module in self.modules.drain(..) {
            std::mem::forget(module.library);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructor::ObjectConstructor;
    use crate::object::Object;
    use void_core::ObjectId;

    struct Thing {
        id: ObjectId,
    }

    impl Object for Thing {
        fn object_id(&self) -> ObjectId {
            self.id
        }

        crate::impl_object_any!();
    }

    fn constructors() -> Vec<Box<dyn Constructor>> {
        vec![Box::new(ObjectConstructor::new("Thing", |id| Thing { id }))]
    }

    crate::export_module!(constructors);

    fn broken() -> Box<dyn ModuleDescriptor> {
        panic!("module initialiser failed")
    }

    #[test]
    fn test_exported_entry_point() {
        let services = HostServices::silent();
        let loaded = load_from_entry(void_hotswap_module, Path::new("test.so"), &services).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "Thing");
    }

    #[test]
    fn test_panicking_entry_point() {
        let loaded = load_from_entry(broken, Path::new("broken.so"), &HostServices::silent());
        match loaded {
            Err(HotSwapError::ModuleLoad { path, message }) => {
                assert_eq!(path, PathBuf::from("broken.so"));
                assert_eq!(message, "module initialiser failed");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(constructors) => panic!("loaded {} constructors", constructors.len()),
        }
    }

    #[test]
    fn test_static_module_keeps_services() {
        let mut module = StaticModule::new(constructors);
        assert!(module.services().is_none());
        module.set_host_services(HostServices::silent());
        assert_eq!(module.services().map(|s| s.max_level), Some(log::LevelFilter::Off));
    }

    #[test]
    fn test_missing_module_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = DynamicModuleLoader::new();
        let result = loader.load_module(&dir.path().join("missing.so"), &HostServices::silent());
        assert!(matches!(result, Err(HotSwapError::ModuleLoad { .. })));
        assert_eq!(loader.loaded_modules().count(), 0);
    }
}

//! Shared fixtures: object types, a scripted build tool and a scripted loader

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use void_hotswap::prelude::*;
use void_hotswap::{BuildHandle, BuildRequest, BuildTool, HostServices, ModuleLoader};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ========== Object types ==========

pub struct Counter {
    pub id: ObjectId,
    pub count: i32,
}

impl Object for Counter {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn serialize(&mut self, store: &mut SerializedValueStore) {
        store.serialize_property("count", &mut self.count);
    }

    void_hotswap::impl_object_any!();
}

pub fn counter() -> Box<dyn Constructor> {
    Box::new(ObjectConstructor::new("Counter", |id| Counter { id, count: 0 }))
}

/// Next version of `Counter` with an added field
pub struct LabeledCounter {
    pub id: ObjectId,
    pub count: i32,
    pub label: String,
}

impl Object for LabeledCounter {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn serialize(&mut self, store: &mut SerializedValueStore) {
        store.serialize_property("count", &mut self.count);
        store.serialize_property("label", &mut self.label);
    }

    void_hotswap::impl_object_any!();
}

pub fn labeled_counter() -> Box<dyn Constructor> {
    Box::new(ObjectConstructor::new("Counter", |id| LabeledCounter {
        id,
        count: 0,
        label: String::new(),
    }))
}

/// Where a broken build of `Counter` panics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAt {
    Construct(u32),
    Load(u32),
    Init(u32),
}

pub struct FaultyCounter {
    pub id: ObjectId,
    pub count: i32,
    pub fault: FaultAt,
}

impl Object for FaultyCounter {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn serialize(&mut self, store: &mut SerializedValueStore) {
        if store.is_loading() && self.fault == FaultAt::Load(self.id.per_type().index()) {
            panic!("corrupt state in slot {}", self.id.per_type().index());
        }
        store.serialize_property("count", &mut self.count);
    }

    fn init(&mut self, first_init: bool) {
        if !first_init && self.fault == FaultAt::Init(self.id.per_type().index()) {
            panic!("init exploded");
        }
    }

    void_hotswap::impl_object_any!();
}

pub fn faulty_counter(fault: FaultAt) -> Box<dyn Constructor> {
    Box::new(ObjectConstructor::new("Counter", move |id| {
        if fault == FaultAt::Construct(id.per_type().index()) {
            panic!("constructor failed");
        }
        FaultyCounter { id, count: -1, fault }
    }))
}

/// A type that only exists in newer builds
pub struct Extra {
    pub id: ObjectId,
}

impl Object for Extra {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    void_hotswap::impl_object_any!();
}

pub fn extra() -> Box<dyn Constructor> {
    Box::new(ObjectConstructor::new("Extra", |id| Extra { id }))
}

/// Records every destruction with the build generation that saw it
pub type DestroyLog = Arc<Mutex<Vec<(u32, DestroyReason)>>>;

pub struct Tracked {
    pub id: ObjectId,
    pub generation: u32,
    pub value: u32,
    log: DestroyLog,
}

impl Object for Tracked {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn serialize(&mut self, store: &mut SerializedValueStore) {
        store.serialize_property("value", &mut self.value);
    }

    fn on_destroy(&mut self, reason: DestroyReason) {
        self.log.lock().push((self.generation, reason));
    }

    void_hotswap::impl_object_any!();
}

pub fn tracked(generation: u32, log: &DestroyLog) -> Box<dyn Constructor> {
    let log = log.clone();
    Box::new(ObjectConstructor::new("Tracked", move |id| Tracked {
        id,
        generation,
        value: 0,
        log: log.clone(),
    }))
}

// ========== Build tool ==========

#[derive(Default)]
struct BuildState {
    requests: Vec<BuildRequest>,
    abandoned: Vec<BuildHandle>,
    held: bool,
    fail: bool,
    next: u64,
}

/// Build tool that writes a placeholder module instantly.
///
/// `hold` keeps builds running until `release`; `fail_builds` makes them
/// finish without output.
#[derive(Clone, Default)]
pub struct FakeBuildTool {
    state: Arc<Mutex<BuildState>>,
}

impl FakeBuildTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self) {
        self.state.lock().held = true;
    }

    pub fn release(&self) {
        self.state.lock().held = false;
    }

    pub fn fail_builds(&self, fail: bool) {
        self.state.lock().fail = fail;
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn last_request(&self) -> Option<BuildRequest> {
        self.state.lock().requests.last().cloned()
    }

    pub fn abandoned(&self) -> Vec<BuildHandle> {
        self.state.lock().abandoned.clone()
    }
}

impl BuildTool for FakeBuildTool {
    fn build_module(&mut self, request: BuildRequest) -> void_hotswap::Result<BuildHandle> {
        let mut state = self.state.lock();
        if !state.fail {
            if let Some(parent) = request.output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&request.output_path, b"module")?;
        }
        let handle = BuildHandle(state.next);
        state.next += 1;
        state.requests.push(request);
        Ok(handle)
    }

    fn is_complete(&mut self, _handle: BuildHandle) -> bool {
        !self.state.lock().held
    }

    fn abandon(&mut self, handle: BuildHandle) {
        self.state.lock().abandoned.push(handle);
    }
}

// ========== Module loader ==========

type ModuleBuilder = Box<dyn FnOnce() -> Vec<Box<dyn Constructor>> + Send>;

/// Loader that hands out queued constructor sets in order
#[derive(Clone, Default)]
pub struct FakeModuleLoader {
    modules: Arc<Mutex<VecDeque<ModuleBuilder>>>,
    loaded: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the constructors the next loaded module provides
    pub fn push(&self, build: impl FnOnce() -> Vec<Box<dyn Constructor>> + Send + 'static) {
        self.modules.lock().push_back(Box::new(build));
    }

    pub fn loaded(&self) -> Vec<PathBuf> {
        self.loaded.lock().clone()
    }
}

impl ModuleLoader for FakeModuleLoader {
    fn load_module(
        &mut self,
        path: &Path,
        _services: &HostServices,
    ) -> void_hotswap::Result<Vec<Box<dyn Constructor>>> {
        let build = self
            .modules
            .lock()
            .pop_front()
            .ok_or_else(|| HotSwapError::module_load(path, "no module queued"))?;
        self.loaded.lock().push(path.to_path_buf());
        Ok(build())
    }
}

// ========== Source trees ==========

/// Write a file and return its canonical path
pub fn write_source(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, format!("// {}\n", name)).unwrap();
    fs::canonicalize(path).unwrap()
}

/// Constructor of `Counter` objects under another type name, built from `file`
pub fn counter_from(name: &str, file: &Path) -> ObjectConstructor<Counter> {
    ObjectConstructor::new(name, |id| Counter { id, count: 0 }).with_file(file)
}

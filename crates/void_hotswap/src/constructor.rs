//! Per-type factories
//!
//! A module registers one [`Constructor`] per type it defines. The constructor
//! owns every instance of that type, hands out per-type slot indices and
//! reports the files the type was built from, which feeds dependency tracking.

use std::any::Any;
use std::path::{Path, PathBuf};

use void_core::{CapabilityTable, CapabilityTag, ConstructorId, ObjectId, PerTypeObjectId};

use crate::object::{DestroyReason, Object};
use crate::project::ProjectId;

/// Build metadata a type reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorInfo {
    /// Type name, the key that links versions of a type across reloads
    pub name: String,
    /// Project the type is compiled in
    pub project: ProjectId,
    /// Source file that defines the type
    pub file: Option<PathBuf>,
    /// Headers the source includes
    pub includes: Vec<PathBuf>,
    /// Companion sources that must rebuild whenever this one does
    pub source_dependencies: Vec<PathBuf>,
    /// Libraries the module must link against
    pub link_libraries: Vec<String>,
}

impl ConstructorInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project: ProjectId::default(),
            file: None,
            includes: Vec::new(),
            source_dependencies: Vec::new(),
            link_libraries: Vec::new(),
        }
    }
}

/// Type-erased per-type factory
pub trait Constructor: Send {
    fn info(&self) -> &ConstructorInfo;

    fn name(&self) -> &str {
        &self.info().name
    }

    fn id(&self) -> ConstructorId;

    /// Assigned by the registry before any instance is built
    fn set_id(&mut self, id: ConstructorId);

    /// Build a new instance in the next slot
    fn construct(&mut self) -> ObjectId;

    /// Reserve the next slot without an instance, keeping slot alignment
    fn construct_null(&mut self) -> PerTypeObjectId;

    fn get(&self, slot: PerTypeObjectId) -> Option<&(dyn Object + 'static)>;

    fn get_mut(&mut self, slot: PerTypeObjectId) -> Option<&mut (dyn Object + 'static)>;

    /// Destroy one instance, leaving its slot dead
    fn destroy(&mut self, slot: PerTypeObjectId, reason: DestroyReason) -> bool;

    /// Destroy every instance
    fn destroy_all(&mut self, reason: DestroyReason);

    /// Ids of every live instance, in slot order
    fn object_ids(&self) -> Vec<ObjectId>;

    /// Number of slots, live or dead
    fn slot_count(&self) -> usize;

    fn live_count(&self) -> usize;

    fn is_live(&self, slot: PerTypeObjectId) -> bool {
        self.get(slot).is_some()
    }

    /// Answer a capability query for one instance
    fn query_capability(
        &self,
        slot: PerTypeObjectId,
        tag: CapabilityTag,
    ) -> Option<&(dyn Any + 'static)>;

    /// Answer a capability query that needs exclusive access
    fn query_capability_mut(
        &mut self,
        slot: PerTypeObjectId,
        tag: CapabilityTag,
    ) -> Option<&mut (dyn Any + 'static)>;
}

type Factory<T> = Box<dyn Fn(ObjectId) -> T + Send + Sync>;

/// Constructor for a concrete Rust type
pub struct ObjectConstructor<T: Object> {
    info: ConstructorInfo,
    id: ConstructorId,
    factory: Factory<T>,
    slots: Vec<Option<T>>,
    capabilities: CapabilityTable<T>,
}

impl<T: Object> ObjectConstructor<T> {
    /// Create a constructor; `factory` receives the id of the object it builds
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn(ObjectId) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            info: ConstructorInfo::new(name),
            id: ConstructorId::INVALID,
            factory: Box::new(factory),
            slots: Vec::new(),
            capabilities: CapabilityTable::new(),
        }
    }

    pub fn in_project(mut self, project: ProjectId) -> Self {
        self.info.project = project;
        self
    }

    pub fn with_file(mut self, file: impl AsRef<Path>) -> Self {
        self.info.file = Some(file.as_ref().to_path_buf());
        self
    }

    pub fn with_include(mut self, header: impl AsRef<Path>) -> Self {
        self.info.includes.push(header.as_ref().to_path_buf());
        self
    }

    pub fn with_source_dependency(mut self, source: impl AsRef<Path>) -> Self {
        self.info.source_dependencies.push(source.as_ref().to_path_buf());
        self
    }

    pub fn with_link_library(mut self, library: impl Into<String>) -> Self {
        self.info.link_libraries.push(library.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityTable<T>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Typed access to an instance
    pub fn instance(&self, slot: PerTypeObjectId) -> Option<&T> {
        self.slots.get(slot.as_usize()).and_then(Option::as_ref)
    }

    pub fn instance_mut(&mut self, slot: PerTypeObjectId) -> Option<&mut T> {
        self.slots.get_mut(slot.as_usize()).and_then(Option::as_mut)
    }

    fn next_slot(&self) -> PerTypeObjectId {
        PerTypeObjectId::new(self.slots.len() as u32)
    }
}

impl<T: Object> Constructor for ObjectConstructor<T> {
    fn info(&self) -> &ConstructorInfo {
        &self.info
    }

    fn id(&self) -> ConstructorId {
        self.id
    }

    fn set_id(&mut self, id: ConstructorId) {
        self.id = id;
    }

    fn construct(&mut self) -> ObjectId {
        let id = ObjectId::new(self.id, self.next_slot());
        let object = (self.factory)(id);
        self.slots.push(Some(object));
        id
    }

    fn construct_null(&mut self) -> PerTypeObjectId {
        let slot = self.next_slot();
        self.slots.push(None);
        slot
    }

    fn get(&self, slot: PerTypeObjectId) -> Option<&(dyn Object + 'static)> {
        self.instance(slot).map(|object| object as &(dyn Object + 'static))
    }

    fn get_mut(&mut self, slot: PerTypeObjectId) -> Option<&mut (dyn Object + 'static)> {
        self.instance_mut(slot).map(|object| object as &mut (dyn Object + 'static))
    }

    fn destroy(&mut self, slot: PerTypeObjectId, reason: DestroyReason) -> bool {
        match self.slots.get_mut(slot.as_usize()).and_then(Option::take) {
            Some(mut object) => {
                object.on_destroy(reason);
                true
            }
            None => false,
        }
    }

    fn destroy_all(&mut self, reason: DestroyReason) {
        for slot in self.slots.iter_mut() {
            if let Some(mut object) = slot.take() {
                object.on_destroy(reason);
            }
        }
    }

    fn object_ids(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| ObjectId::new(self.id, PerTypeObjectId::new(index as u32)))
            .collect()
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn query_capability(
        &self,
        slot: PerTypeObjectId,
        tag: CapabilityTag,
    ) -> Option<&(dyn Any + 'static)> {
        let object = self.instance(slot)?;
        self.capabilities
            .query(object, tag)
            .or_else(|| object.query_capability(tag))
    }

    fn query_capability_mut(
        &mut self,
        slot: PerTypeObjectId,
        tag: CapabilityTag,
    ) -> Option<&mut (dyn Any + 'static)> {
        let object = self.slots.get_mut(slot.as_usize())?.as_mut()?;
        self.capabilities.query_mut(object, tag)
    }
}

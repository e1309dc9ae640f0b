//! Object registry and the swap protocol
//!
//! The registry owns one [`Constructor`] per registered type, addressed by a
//! [`ConstructorId`] that stays fixed across reloads. When a freshly built
//! module hands over new constructors, [`ObjectRegistry::add_constructors`]
//! migrates every live object into an instance of the new code:
//!
//! ```text
//! Dump ──▶ Construct ──▶ Load ──▶ Init ──▶ Commit
//!              │           │        │
//!              └───────────┴────────┴──▶ Rollback
//! ```
//!
//! Either every live object of a swapped type gets a replacement with the same
//! [`ObjectId`], or the previous constructor set and its objects are restored
//! as they were.

use std::collections::{HashMap, HashSet};

use void_core::{
    downcast_capability, downcast_capability_mut, Capability, ConstructorId, ObjectId,
    PerTypeObjectId,
};

use crate::constructor::{Constructor, ConstructorInfo};
use crate::error::{HotSwapError, Result};
use crate::fault::{run_protected, Fault, SwapPhase};
use crate::object::{DestroyReason, Object};
use crate::store::SerializedValueStore;

/// Summary of a successful swap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    /// Constructors that replaced a previous version
    pub swapped: Vec<ConstructorId>,
    /// Constructors registered for the first time
    pub added: Vec<ConstructorId>,
    /// Objects rebuilt in the new code
    pub objects_migrated: usize,
    /// Type names dropped because the module registered them twice
    pub skipped_duplicates: Vec<String>,
}

impl SwapReport {
    /// Every constructor touched by the swap
    pub fn changed(&self) -> impl Iterator<Item = ConstructorId> + '_ {
        self.swapped.iter().chain(self.added.iter()).copied()
    }
}

/// Callback fired on the swapping thread after a successful commit
pub type ConstructorsChangedListener = Box<dyn FnMut(&SwapReport) + Send>;

/// A constructor waiting to be installed
struct Staged {
    id: ConstructorId,
    constructor: Box<dyn Constructor>,
}

/// Registry slot state before the swap touched it
struct Installed {
    id: ConstructorId,
    previous: Option<Box<dyn Constructor>>,
}

/// What a failed swap has to undo
struct RollbackScope {
    installed: Vec<Installed>,
    /// Incoming constructors that never reached the registry
    discarded: Vec<Box<dyn Constructor>>,
    /// Ids of every incoming constructor
    attempted: Vec<ConstructorId>,
    /// Names registered for the first time by this swap
    new_names: Vec<String>,
    registered_len: usize,
}

/// Owns every constructor and runs the swap protocol
pub struct ObjectRegistry {
    /// Indexed by ConstructorId
    constructors: Vec<Option<Box<dyn Constructor>>>,
    by_name: HashMap<String, ConstructorId>,
    listeners: Vec<ConstructorsChangedListener>,
    swap_in_progress: bool,
}

impl ObjectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            constructors: Vec::new(),
            by_name: HashMap::new(),
            listeners: Vec::new(),
            swap_in_progress: false,
        }
    }

    // ========== Type Registration ==========

    /// Get the id for a type name, allocating one on first sight
    pub fn register_type(&mut self, name: &str) -> ConstructorId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }

        let id = ConstructorId::new(self.constructors.len() as u32);
        self.constructors.push(None);
        self.by_name.insert(name.to_string(), id);
        log::debug!("Registered type '{}' as {:?}", name, id);
        id
    }

    /// Id registered for a type name
    pub fn constructor_id(&self, name: &str) -> Option<ConstructorId> {
        self.by_name.get(name).copied()
    }

    /// Constructor by id
    pub fn lookup(&self, id: ConstructorId) -> Option<&(dyn Constructor + 'static)> {
        self.constructors
            .get(id.index() as usize)
            .and_then(|slot| slot.as_deref())
    }

    /// Mutable constructor by id
    pub fn lookup_mut(&mut self, id: ConstructorId) -> Option<&mut (dyn Constructor + 'static)> {
        self.constructors
            .get_mut(id.index() as usize)
            .and_then(|slot| slot.as_deref_mut())
    }

    /// Constructor by type name
    pub fn lookup_by_name(&self, name: &str) -> Option<&(dyn Constructor + 'static)> {
        self.constructor_id(name).and_then(|id| self.lookup(id))
    }

    /// Ids of every installed constructor
    pub fn constructor_ids(&self) -> Vec<ConstructorId> {
        self.constructors
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| ConstructorId::new(index as u32))
            .collect()
    }

    pub fn constructor_count(&self) -> usize {
        self.constructors.iter().filter(|slot| slot.is_some()).count()
    }

    /// Build metadata of the given constructors
    pub fn constructor_infos(
        &self,
        ids: impl IntoIterator<Item = ConstructorId>,
    ) -> Vec<ConstructorInfo> {
        ids.into_iter()
            .filter_map(|id| self.lookup(id))
            .map(|ctor| ctor.info().clone())
            .collect()
    }

    // ========== Object Management ==========

    /// Construct and initialise a new object
    pub fn construct(&mut self, id: ConstructorId) -> Result<ObjectId> {
        let ctor = self.lookup_mut(id).ok_or(HotSwapError::ConstructorNotFound(id))?;
        let object_id = ctor.construct();
        if let Some(object) = ctor.get_mut(object_id.per_type()) {
            object.init(true);
        }
        log::debug!("Constructed {} '{}'", object_id, ctor.name());
        Ok(object_id)
    }

    /// Construct an object by type name
    pub fn construct_by_name(&mut self, name: &str) -> Result<ObjectId> {
        let id = self
            .constructor_id(name)
            .ok_or_else(|| HotSwapError::TypeNotFound(name.to_string()))?;
        self.construct(id)
    }

    /// Destroy an object. Its slot stays dead; ids are never handed out again.
    pub fn destroy(&mut self, id: ObjectId) -> bool {
        match self.lookup_mut(id.constructor()) {
            Some(ctor) => ctor.destroy(id.per_type(), DestroyReason::Explicit),
            None => false,
        }
    }

    /// Resolve an object id
    pub fn get(&self, id: ObjectId) -> Option<&(dyn Object + 'static)> {
        self.lookup(id.constructor())?.get(id.per_type())
    }

    /// Resolve an object id mutably
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut (dyn Object + 'static)> {
        self.lookup_mut(id.constructor())?.get_mut(id.per_type())
    }

    /// Resolve an object id to a concrete type
    pub fn get_as<T: Object>(&self, id: ObjectId) -> Option<&T> {
        self.get(id)?.downcast_ref::<T>()
    }

    pub fn get_as_mut<T: Object>(&mut self, id: ObjectId) -> Option<&mut T> {
        self.get_mut(id)?.downcast_mut::<T>()
    }

    /// Query a typed capability of an object
    pub fn capability<C: Capability>(&self, id: ObjectId) -> Option<&C> {
        let ctor = self.lookup(id.constructor())?;
        downcast_capability::<C>(ctor.query_capability(id.per_type(), C::TAG))
    }

    /// Query a typed capability that hands out exclusive access
    pub fn capability_mut<C: Capability>(&mut self, id: ObjectId) -> Option<&mut C> {
        let ctor = self.lookup_mut(id.constructor())?;
        downcast_capability_mut::<C>(ctor.query_capability_mut(id.per_type(), C::TAG))
    }

    /// Ids of every live object, grouped by constructor
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.constructors
            .iter()
            .flatten()
            .flat_map(|ctor| ctor.object_ids())
            .collect()
    }

    pub fn object_count(&self) -> usize {
        self.constructors.iter().flatten().map(|ctor| ctor.live_count()).sum()
    }

    // ========== Listeners ==========

    /// Register a listener fired after every successful swap
    pub fn on_constructors_changed(&mut self, listener: ConstructorsChangedListener) {
        self.listeners.push(listener);
    }

    pub fn is_swapping(&self) -> bool {
        self.swap_in_progress
    }

    // ========== Swap Protocol ==========

    /// Install constructors from a freshly loaded module, migrating the state
    /// of every live object of a same-named type into new instances.
    ///
    /// On a fault during construct, load or init, the previous constructors
    /// are reinstated and nothing is destroyed.
    pub fn add_constructors(&mut self, incoming: Vec<Box<dyn Constructor>>) -> Result<SwapReport> {
        if self.swap_in_progress {
            return Err(HotSwapError::SwapInProgress);
        }

        self.swap_in_progress = true;
        let result = self.swap(incoming);
        self.swap_in_progress = false;

        if let Ok(report) = &result {
            for listener in self.listeners.iter_mut() {
                listener(report);
            }
        }

        result
    }

    fn swap(&mut self, incoming: Vec<Box<dyn Constructor>>) -> Result<SwapReport> {
        let mut report = SwapReport::default();
        let incoming = self.deduplicate(incoming, &mut report.skipped_duplicates);

        // Dump: already-running code, not protected
        let mut store = SerializedValueStore::new();
        store.begin_capture();
        for ctor in self.constructors.iter_mut().flatten() {
            serialize_objects(ctor.as_mut(), &mut store);
        }

        let registered_len = self.constructors.len();
        let mut new_names = Vec::new();
        let mut staged = Vec::with_capacity(incoming.len());
        for mut constructor in incoming {
            let name = constructor.name().to_string();
            let id = match self.by_name.get(&name) {
                Some(id) => *id,
                None => {
                    new_names.push(name.clone());
                    self.register_type(&name)
                }
            };
            constructor.set_id(id);
            staged.push(Staged { id, constructor });
        }

        let attempted: Vec<ConstructorId> = staged.iter().map(|s| s.id).collect();

        // Construct: one new instance per occupied old slot, placeholders for dead ones
        let mut fault = None;
        for entry in staged.iter_mut() {
            let Some(old) = self.lookup(entry.id) else {
                continue;
            };
            let live: Vec<bool> = (0..old.slot_count())
                .map(|slot| old.is_live(PerTypeObjectId::new(slot as u32)))
                .collect();

            let name = entry.constructor.name().to_string();
            let file = entry.constructor.info().file.clone();

            // Slots must line up one for one with the old constructor's
            let prebuilt = entry.constructor.slot_count();
            if prebuilt != 0 {
                fault = Some(Fault {
                    phase: SwapPhase::Construct,
                    constructor: Some(name),
                    file,
                    message: format!("arrived holding {} instances", prebuilt),
                });
                break;
            }

            let constructor = &mut entry.constructor;
            let built = run_protected(SwapPhase::Construct, Some(&name), || {
                let mut migrated = 0;
                for is_live in live {
                    if is_live {
                        constructor.construct();
                        migrated += 1;
                    } else {
                        constructor.construct_null();
                    }
                }
                migrated
            });

            match built {
                Ok(migrated) => report.objects_migrated += migrated,
                Err(err) => {
                    fault = Some(err.with_file(file));
                    break;
                }
            }
        }
        if let Some(fault) = fault {
            let discarded = staged.into_iter().map(|s| s.constructor).collect();
            let scope = RollbackScope {
                installed: Vec::new(),
                discarded,
                attempted,
                new_names,
                registered_len,
            };
            return Err(self.rollback(fault, scope, &mut store));
        }

        // Install the new constructor set
        let mut installed = Vec::with_capacity(staged.len());
        for Staged { id, constructor } in staged {
            let slot = &mut self.constructors[id.index() as usize];
            let previous = slot.replace(constructor);
            if previous.is_some() {
                report.swapped.push(id);
            } else {
                report.added.push(id);
            }
            installed.push(Installed { id, previous });
        }

        // Load: restore captured state into every object of the new state
        store.begin_restore();
        let mut fault = None;
        for ctor in self.constructors.iter_mut().flatten() {
            let name = ctor.name().to_string();
            let file = ctor.info().file.clone();
            if let Err(err) = run_protected(SwapPhase::Load, Some(&name), || {
                serialize_objects(ctor.as_mut(), &mut store)
            }) {
                fault = Some(err.with_file(file));
                break;
            }
        }

        // Init the swapped-in objects, then smoke-test brand-new types by
        // capturing them into a throwaway store
        if fault.is_none() {
            for entry in installed.iter() {
                let Some(ctor) = self.lookup_mut(entry.id) else {
                    continue;
                };
                let name = ctor.name().to_string();
                let file = ctor.info().file.clone();
                let is_new_type = entry.previous.is_none();
                let checked = run_protected(SwapPhase::Init, Some(&name), || {
                    init_objects(ctor, false);
                    if is_new_type {
                        let mut scratch = SerializedValueStore::new();
                        serialize_objects(ctor, &mut scratch);
                    }
                });
                if let Err(err) = checked {
                    fault = Some(err.with_file(file));
                    break;
                }
            }
        }

        if let Some(fault) = fault {
            let scope = RollbackScope {
                installed,
                discarded: Vec::new(),
                attempted,
                new_names,
                registered_len,
            };
            return Err(self.rollback(fault, scope, &mut store));
        }

        // Commit: retire the superseded instances. The new code is live now,
        // so a fault in old teardown is only reported.
        for Installed { id, previous } in installed {
            let Some(mut old) = previous else {
                continue;
            };
            let name = old.name().to_string();
            let retired = run_protected(SwapPhase::Commit, Some(&name), move || {
                old.destroy_all(DestroyReason::Reload);
                drop(old);
            });
            match retired {
                Ok(()) => log::debug!("Retired previous constructor for '{}' ({:?})", name, id),
                Err(fault) => log::error!("Retiring previous constructor failed: {}", fault),
            }
        }

        log::info!(
            "Swapped {} constructors ({} new), migrated {} objects",
            report.swapped.len(),
            report.added.len(),
            report.objects_migrated
        );

        Ok(report)
    }

    /// Drop constructors whose name already appeared earlier in the same module
    fn deduplicate(
        &self,
        incoming: Vec<Box<dyn Constructor>>,
        skipped: &mut Vec<String>,
    ) -> Vec<Box<dyn Constructor>> {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(incoming.len());
        for constructor in incoming {
            if seen.insert(constructor.name().to_string()) {
                unique.push(constructor);
            } else {
                log::warn!(
                    "Type '{}' registered twice in one module, skipping the duplicate",
                    constructor.name()
                );
                skipped.push(constructor.name().to_string());
                discard(constructor);
            }
        }
        unique
    }

    /// Reinstate the pre-swap constructor set and re-absorb the captured state
    fn rollback(
        &mut self,
        fault: Fault,
        scope: RollbackScope,
        store: &mut SerializedValueStore,
    ) -> HotSwapError {
        log::error!("Hot-swap {}, rolling back", fault);

        let RollbackScope {
            installed,
            mut discarded,
            attempted,
            new_names,
            registered_len,
        } = scope;

        for Installed { id, previous } in installed {
            let slot = &mut self.constructors[id.index() as usize];
            if let Some(failed) = std::mem::replace(slot, previous) {
                discarded.push(failed);
            }
        }

        for name in &new_names {
            self.by_name.remove(name);
        }
        self.constructors.truncate(registered_len);

        for constructor in discarded {
            discard(constructor);
        }

        // Surviving code re-absorbs its own capture
        store.begin_restore();
        for ctor in self.constructors.iter_mut().flatten() {
            let name = ctor.name().to_string();
            if let Err(fault) = run_protected(SwapPhase::Rollback, Some(&name), || {
                serialize_objects(ctor.as_mut(), store)
            }) {
                log::error!("Restoring previous state failed: {}", fault);
            }
        }
        // Every surviving type the swap tried to replace is initialised again
        for id in attempted {
            let Some(ctor) = self.lookup_mut(id) else {
                continue;
            };
            let name = ctor.name().to_string();
            let reinit =
                run_protected(SwapPhase::Rollback, Some(&name), || init_objects(ctor, false));
            if let Err(fault) = reinit {
                log::error!("Re-initialising previous objects failed: {}", fault);
            }
        }

        HotSwapError::SwapFailed {
            phase: fault.phase,
            constructor: fault.constructor,
            file: fault.file,
            message: fault.message,
        }
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `serialize` on every live object of a constructor
fn serialize_objects(ctor: &mut (dyn Constructor + 'static), store: &mut SerializedValueStore) {
    for id in ctor.object_ids() {
        if let Some(object) = ctor.get_mut(id.per_type()) {
            store.set_active_object(Some(id));
            object.serialize(store);
        }
    }
    store.set_active_object(None);
}

fn init_objects(ctor: &mut (dyn Constructor + 'static), first_init: bool) {
    for id in ctor.object_ids() {
        if let Some(object) = ctor.get_mut(id.per_type()) {
            object.init(first_init);
        }
    }
}

/// Drop a constructor that never went live, containing faults from its code
fn discard(mut constructor: Box<dyn Constructor>) {
    let name = constructor.name().to_string();
    let dropped = run_protected(SwapPhase::Rollback, Some(&name), move || {
        constructor.destroy_all(DestroyReason::Rollback);
        drop(constructor);
    });
    if let Err(fault) = dropped {
        log::error!("Discarding constructor failed: {}", fault);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructor::ObjectConstructor;

    struct Gauge {
        id: ObjectId,
        value: i32,
    }

    impl Object for Gauge {
        fn object_id(&self) -> ObjectId {
            self.id
        }

        fn serialize(&mut self, store: &mut SerializedValueStore) {
            store.serialize_property("value", &mut self.value);
        }

        crate::impl_object_any!();
    }

    fn gauge_constructor() -> Box<dyn Constructor> {
        Box::new(ObjectConstructor::new("Gauge", |id| Gauge { id, value: 0 }))
    }

    #[test]
    fn test_register_type_is_stable() {
        let mut registry = ObjectRegistry::new();
        let a = registry.register_type("A");
        let b = registry.register_type("B");
        assert_eq!(registry.register_type("A"), a);
        assert_ne!(a, b);
        assert!(registry.lookup(a).is_none());
        assert!(registry.lookup_by_name("missing").is_none());
    }

    #[test]
    fn test_construct_unknown_constructor() {
        let mut registry = ObjectRegistry::new();
        assert!(matches!(
            registry.construct(ConstructorId::new(4)),
            Err(HotSwapError::ConstructorNotFound(_))
        ));
        assert!(matches!(
            registry.construct_by_name("Nope"),
            Err(HotSwapError::TypeNotFound(_))
        ));
    }

    #[test]
    fn test_first_registration_adds() {
        let mut registry = ObjectRegistry::new();
        let report = registry.add_constructors(vec![gauge_constructor()]).unwrap();
        assert_eq!(report.added, vec![ConstructorId::new(0)]);
        assert!(report.swapped.is_empty());
        assert_eq!(registry.constructor_count(), 1);
        assert!(!registry.is_swapping());
    }

    #[test]
    fn test_duplicates_are_skipped() {
        let mut registry = ObjectRegistry::new();
        let report = registry
            .add_constructors(vec![gauge_constructor(), gauge_constructor()])
            .unwrap();
        assert_eq!(report.skipped_duplicates, vec!["Gauge".to_string()]);
        assert_eq!(registry.constructor_count(), 1);
    }

    #[test]
    fn test_dead_slots_survive_swap() {
        let mut registry = ObjectRegistry::new();
        registry.add_constructors(vec![gauge_constructor()]).unwrap();
        let a = registry.construct_by_name("Gauge").unwrap();
        let b = registry.construct_by_name("Gauge").unwrap();
        registry.get_as_mut::<Gauge>(b).unwrap().value = 11;
        assert!(registry.destroy(a));

        let report = registry.add_constructors(vec![gauge_constructor()]).unwrap();
        assert_eq!(report.objects_migrated, 1);
        assert!(registry.get(a).is_none());
        assert_eq!(registry.get_as::<Gauge>(b).map(|p| p.value), Some(11));
        assert_eq!(registry.lookup(b.constructor()).map(|c| c.slot_count()), Some(2));
    }
}

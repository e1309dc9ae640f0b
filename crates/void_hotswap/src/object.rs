//! The object contract between the host and hot-swappable modules

use std::any::Any;

use void_core::{CapabilityTag, ObjectId};

use crate::store::SerializedValueStore;

/// Why an object is being destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// Destroyed by the host
    Explicit,
    /// Superseded by a freshly built instance carrying the same id. Shared
    /// resources are still owned by the replacement; skip tearing them down.
    Reload,
    /// Discarded after a failed swap; the instance never went live
    Rollback,
}

impl DestroyReason {
    pub fn is_reload(&self) -> bool {
        matches!(self, DestroyReason::Reload)
    }
}

/// A hot-swappable object.
///
/// Field state moves between builds only through [`Object::serialize`], which
/// is called in capture mode on the old instance and in restore mode on its
/// replacement:
///
/// ```ignore
/// fn serialize(&mut self, store: &mut SerializedValueStore) {
///     store.serialize_property("count", &mut self.count);
///     store.serialize_property("label", &mut self.label);
/// }
/// ```
pub trait Object: Any + Send {
    /// Identity assigned by the constructor that built this object
    fn object_id(&self) -> ObjectId;

    /// Capture or restore field state
    fn serialize(&mut self, _store: &mut SerializedValueStore) {}

    /// Called after construction (`first_init = true`) and after every swap
    /// once state has been restored (`first_init = false`)
    fn init(&mut self, _first_init: bool) {}

    /// Called right before the object is dropped
    fn on_destroy(&mut self, _reason: DestroyReason) {}

    /// Per-object capability answers, consulted after the constructor's table
    fn query_capability(&self, _tag: CapabilityTag) -> Option<&(dyn Any + 'static)> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Object {
    /// Downcast to a concrete type living in the same module
    pub fn downcast_ref<T: Object>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Downcast to a mutable concrete type living in the same module
    pub fn downcast_mut<T: Object>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

/// Implements the `as_any` boilerplate of [`Object`]
#[macro_export]
macro_rules! impl_object_any {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
}

//! Typed capability queries without cross-module type identity
//!
//! A capability is looked up by a [`CapabilityTag`] derived from its name,
//! not by a compiler-generated type id, so a module built separately from the
//! host still answers queries for the same tags. Absence is always `None`;
//! a query never panics.

use core::any::Any;
use core::fmt;
use alloc::collections::BTreeMap;

use crate::id::fnv1a;

/// Stable identifier for a capability
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityTag {
    hash: u64,
}

impl CapabilityTag {
    /// Create a tag from a capability name
    pub const fn new(name: &str) -> Self {
        Self { hash: fnv1a(name) }
    }

    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.hash
    }
}

impl fmt::Debug for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityTag({:#018x})", self.hash)
    }
}

/// A typed capability an object may expose.
///
/// ```ignore
/// struct Transform { position: [f32; 3] }
///
/// impl Capability for Transform {
///     const TAG: CapabilityTag = CapabilityTag::new("Transform");
/// }
/// ```
pub trait Capability: Any {
    const TAG: CapabilityTag;
}

type Accessor<T> = fn(&T) -> &(dyn Any + 'static);
type AccessorMut<T> = fn(&mut T) -> &mut (dyn Any + 'static);

/// Per-type table of capability handlers, keyed by tag
pub struct CapabilityTable<T> {
    shared: BTreeMap<CapabilityTag, Accessor<T>>,
    exclusive: BTreeMap<CapabilityTag, AccessorMut<T>>,
}

impl<T> CapabilityTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            shared: BTreeMap::new(),
            exclusive: BTreeMap::new(),
        }
    }

    /// Register a shared accessor for a tag
    pub fn with(mut self, tag: CapabilityTag, accessor: Accessor<T>) -> Self {
        self.shared.insert(tag, accessor);
        self
    }

    /// Register a mutable accessor for a tag
    pub fn with_mut(mut self, tag: CapabilityTag, accessor: AccessorMut<T>) -> Self {
        self.exclusive.insert(tag, accessor);
        self
    }

    /// Whether anything answers the tag
    pub fn contains(&self, tag: CapabilityTag) -> bool {
        self.shared.contains_key(&tag) || self.exclusive.contains_key(&tag)
    }

    /// Resolve a tag against an object
    pub fn query<'a>(&self, object: &'a T, tag: CapabilityTag) -> Option<&'a (dyn Any + 'static)> {
        self.shared.get(&tag).map(|accessor| accessor(object))
    }

    /// Resolve a tag against an object mutably
    pub fn query_mut<'a>(
        &self,
        object: &'a mut T,
        tag: CapabilityTag,
    ) -> Option<&'a mut (dyn Any + 'static)> {
        self.exclusive.get(&tag).map(|accessor| accessor(object))
    }

    pub fn len(&self) -> usize {
        self.shared.len() + self.exclusive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_empty()
    }
}

impl<T> Default for CapabilityTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CapabilityTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("shared", &self.shared.len())
            .field("exclusive", &self.exclusive.len())
            .finish()
    }
}

/// Narrow an untyped capability answer to the requested capability
pub fn downcast_capability<'a, C: Capability>(
    answer: Option<&'a (dyn Any + 'static)>,
) -> Option<&'a C> {
    answer.and_then(|any| any.downcast_ref::<C>())
}

/// Mutable counterpart of [`downcast_capability`]
pub fn downcast_capability_mut<'a, C: Capability>(
    answer: Option<&'a mut (dyn Any + 'static)>,
) -> Option<&'a mut C> {
    answer.and_then(|any| any.downcast_mut::<C>())
}

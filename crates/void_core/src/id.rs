//! Stable object identity across code reloads
//!
//! Objects are addressed by the pair (constructor, per-type slot). Both halves
//! survive a hot-swap of the type that owns them, so an [`ObjectId`] can be
//! stored anywhere in the process as a long-lived handle and resolved through
//! the object registry at the point of use.

use core::fmt;
use core::hash::{Hash, Hasher};

/// Identifies one registered type across reloads.
///
/// Assigned the first time a type name is seen and reused whenever a new
/// version of the same-named type is swapped in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstructorId(u32);

impl ConstructorId {
    /// Invalid constructor id
    pub const INVALID: Self = Self(u32::MAX);

    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }
}

impl fmt::Debug for ConstructorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "ConstructorId({})", self.0)
        } else {
            write!(f, "ConstructorId(invalid)")
        }
    }
}

/// Dense index of an instance inside its constructor.
///
/// Slots are never compacted: a destroyed instance leaves a dead slot behind,
/// so indices of the surviving instances never move.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PerTypeObjectId(u32);

impl PerTypeObjectId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PerTypeObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PerTypeObjectId({})", self.0)
    }
}

/// Globally stable identity of a live object
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId {
    /// Upper 32 bits: constructor, lower 32 bits: per-type slot
    bits: u64,
}

impl ObjectId {
    /// Create an object id from its two halves
    #[inline]
    pub const fn new(constructor: ConstructorId, per_type: PerTypeObjectId) -> Self {
        Self {
            bits: (constructor.index() as u64) << 32 | per_type.index() as u64,
        }
    }

    /// Create a null/invalid ID
    #[inline]
    pub const fn null() -> Self {
        Self { bits: u64::MAX }
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.bits == u64::MAX
    }

    /// The constructor (type) half
    #[inline]
    pub const fn constructor(&self) -> ConstructorId {
        ConstructorId::new((self.bits >> 32) as u32)
    }

    /// The per-type slot half
    #[inline]
    pub const fn per_type(&self) -> PerTypeObjectId {
        PerTypeObjectId::new(self.bits as u32)
    }

    /// Get the raw bits
    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.bits
    }

    /// Create from raw bits
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::null()
    }
}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ObjectId(null)")
        } else {
            write!(
                f,
                "ObjectId({}:{})",
                self.constructor().index(),
                self.per_type().index()
            )
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}:{}", self.constructor().index(), self.per_type().index())
        }
    }
}

/// FNV-1a hash used for stable, compiler-independent name identifiers
pub const fn fnv1a(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash = 0xcbf29ce484222325u64;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x100000001b3);
        i += 1;
    }
    hash
}

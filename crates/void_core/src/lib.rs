//! # void_core - Void Engine Core
//!
//! Zero-dependency primitives shared by the host process and every hot-swappable
//! module built against it:
//! - **Identity**: `ConstructorId`, `PerTypeObjectId` and `ObjectId`, stable across reloads
//! - **Values**: opaque `SerializedValue`s that carry field state from an old build to a new one
//! - **Capabilities**: tag-addressed queries that need no shared type identity
//!
//! Nothing here knows about dynamic loading; that lives in `void_hotswap`.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

pub mod capability;
pub mod id;
pub mod value;

pub use capability::*;
pub use id::*;
pub use value::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::capability::{Capability, CapabilityTable, CapabilityTag};
    pub use crate::id::{ConstructorId, ObjectId, PerTypeObjectId};
    pub use crate::value::{Property, SerializedValue};
}

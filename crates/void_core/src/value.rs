//! Opaque values carried across a hot-swap
//!
//! The value store never interprets what it holds; these variants only exist
//! so that an old and a new build of a type can agree on a field's contents
//! without sharing a type layout.

use alloc::string::String;
use alloc::vec::Vec;

use crate::id::ObjectId;

/// A boxed primitive, vector or string captured from an object field
#[derive(Debug, Clone, PartialEq)]
pub enum SerializedValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Reference to another object, resolved through the registry at use time
    Object(ObjectId),
    Bytes(Vec<u8>),
    Array(Vec<SerializedValue>),
}

impl SerializedValue {
    /// Get type name for debugging
    pub fn type_name(&self) -> &'static str {
        match self {
            SerializedValue::Bool(_) => "bool",
            SerializedValue::Int(_) => "int",
            SerializedValue::UInt(_) => "uint",
            SerializedValue::Float(_) => "float",
            SerializedValue::String(_) => "string",
            SerializedValue::Vec2(_) => "vec2",
            SerializedValue::Vec3(_) => "vec3",
            SerializedValue::Vec4(_) => "vec4",
            SerializedValue::Object(_) => "object",
            SerializedValue::Bytes(_) => "bytes",
            SerializedValue::Array(_) => "array",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SerializedValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as signed integer, accepting unsigned values that fit
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SerializedValue::Int(v) => Some(*v),
            SerializedValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Get as unsigned integer, accepting non-negative signed values
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            SerializedValue::UInt(v) => Some(*v),
            SerializedValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SerializedValue::Float(v) => Some(*v),
            SerializedValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SerializedValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            SerializedValue::Object(v) => Some(*v),
            _ => None,
        }
    }
}

/// A field type that can travel through the value store.
///
/// `from_value` returns `None` when the stored value cannot be converted;
/// the caller keeps its own default in that case.
pub trait Property: Sized {
    fn to_value(&self) -> SerializedValue;
    fn from_value(value: &SerializedValue) -> Option<Self>;
}

macro_rules! impl_int_property {
    ($($ty:ty),*) => {
        $(
            impl Property for $ty {
                fn to_value(&self) -> SerializedValue {
                    SerializedValue::Int(*self as i64)
                }

                fn from_value(value: &SerializedValue) -> Option<Self> {
                    value.as_int().and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

macro_rules! impl_uint_property {
    ($($ty:ty),*) => {
        $(
            impl Property for $ty {
                fn to_value(&self) -> SerializedValue {
                    SerializedValue::UInt(*self as u64)
                }

                fn from_value(value: &SerializedValue) -> Option<Self> {
                    value.as_uint().and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

impl_int_property!(i8, i16, i32, i64, isize);
impl_uint_property!(u8, u16, u32, u64, usize);

impl Property for bool {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::Bool(*self)
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        value.as_bool()
    }
}

impl Property for f32 {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::Float(*self as f64)
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        value.as_float().map(|v| v as f32)
    }
}

impl Property for f64 {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::Float(*self)
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        value.as_float()
    }
}

impl Property for String {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::String(self.clone())
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        value.as_str().map(String::from)
    }
}

impl Property for [f32; 2] {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::Vec2(*self)
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        match value {
            SerializedValue::Vec2(v) => Some(*v),
            _ => None,
        }
    }
}

impl Property for [f32; 3] {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::Vec3(*self)
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        match value {
            SerializedValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }
}

impl Property for [f32; 4] {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::Vec4(*self)
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        match value {
            SerializedValue::Vec4(v) => Some(*v),
            _ => None,
        }
    }
}

impl Property for ObjectId {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::Object(*self)
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        value.as_object()
    }
}

impl<T: Property> Property for Option<T> {
    fn to_value(&self) -> SerializedValue {
        match self {
            Some(v) => SerializedValue::Array(alloc::vec![v.to_value()]),
            None => SerializedValue::Array(Vec::new()),
        }
    }

    fn from_value(value: &SerializedValue) -> Option<Self> {
        match value {
            SerializedValue::Array(items) if items.is_empty() => Some(None),
            SerializedValue::Array(items) if items.len() == 1 => T::from_value(&items[0]).map(Some),
            _ => None,
        }
    }
}

impl<T: Property> Property for Vec<T> {
    fn to_value(&self) -> SerializedValue {
        SerializedValue::Array(self.iter().map(Property::to_value).collect())
    }

    /// All-or-nothing: one unconvertible element rejects the whole vector
    fn from_value(value: &SerializedValue) -> Option<Self> {
        match value {
            SerializedValue::Array(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

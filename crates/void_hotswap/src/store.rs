//! Type-erased transport for object state across a swap
//!
//! The store is a ledger keyed by (object, property name). It is filled in
//! capture mode from the old instances, switched to restore mode, and read
//! back by the replacements. It is rebuilt for every swap and never persisted.

use std::collections::HashMap;

use void_core::{ObjectId, Property, SerializedValue};

/// Direction of the current serialization pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Capture,
    Restore,
}

/// Ledger of serialized field values
#[derive(Debug, Clone)]
pub struct SerializedValueStore {
    values: HashMap<ObjectId, HashMap<String, SerializedValue>>,
    mode: StoreMode,
    /// Object whose `serialize` call is running
    active_object: Option<ObjectId>,
}

impl SerializedValueStore {
    /// Create an empty store in capture mode
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            mode: StoreMode::Capture,
            active_object: None,
        }
    }

    /// Switch to capture mode
    pub fn begin_capture(&mut self) {
        self.mode = StoreMode::Capture;
        self.active_object = None;
    }

    /// Switch to restore mode
    pub fn begin_restore(&mut self) {
        self.mode = StoreMode::Restore;
        self.active_object = None;
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn is_loading(&self) -> bool {
        self.mode == StoreMode::Restore
    }

    /// Scope subsequent property calls to one object
    pub fn set_active_object(&mut self, id: Option<ObjectId>) {
        self.active_object = id;
    }

    pub fn active_object(&self) -> Option<ObjectId> {
        self.active_object
    }

    /// Store a value, replacing any previous value under the same key
    pub fn set_value(&mut self, id: ObjectId, property: &str, value: SerializedValue) {
        self.values
            .entry(id)
            .or_default()
            .insert(property.to_string(), value);
    }

    /// Look up a value; a miss is not an error
    pub fn get_value(&self, id: ObjectId, property: &str) -> Option<&SerializedValue> {
        self.values.get(&id).and_then(|props| props.get(property))
    }

    /// Whether anything was captured for an object
    pub fn has_object(&self, id: ObjectId) -> bool {
        self.values.contains_key(&id)
    }

    /// Property names captured for an object
    pub fn property_names(&self, id: ObjectId) -> Vec<&str> {
        self.values
            .get(&id)
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Capture or restore one property of the active object.
    ///
    /// In capture mode the current value is recorded. In restore mode the
    /// field is overwritten only when a convertible value was captured under
    /// the same name; otherwise it keeps whatever its constructor set.
    /// Returns whether a value was written or read.
    pub fn serialize_property<P: Property>(&mut self, property: &str, value: &mut P) -> bool {
        let Some(id) = self.active_object else {
            log::warn!("Property '{}' serialized outside of an object scope", property);
            return false;
        };

        match self.mode {
            StoreMode::Capture => {
                self.set_value(id, property, value.to_value());
                true
            }
            StoreMode::Restore => match self.get_value(id, property).and_then(P::from_value) {
                Some(restored) => {
                    *value = restored;
                    true
                }
                None => false,
            },
        }
    }

    /// Remove every value
    pub fn clear(&mut self) {
        self.values.clear();
        self.active_object = None;
    }

    /// Remove every value captured for one object
    pub fn clear_object(&mut self, id: ObjectId) {
        self.values.remove(&id);
    }

    /// Remove a single value
    pub fn clear_property(&mut self, id: ObjectId, property: &str) {
        if let Some(props) = self.values.get_mut(&id) {
            props.remove(property);
            if props.is_empty() {
                self.values.remove(&id);
            }
        }
    }

    /// Number of objects with captured values
    pub fn object_count(&self) -> usize {
        self.values.len()
    }

    /// Total number of captured values
    pub fn len(&self) -> usize {
        self.values.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for SerializedValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_core::{ConstructorId, PerTypeObjectId};

    fn oid(slot: u32) -> ObjectId {
        ObjectId::new(ConstructorId::new(0), PerTypeObjectId::new(slot))
    }

    #[test]
    fn test_capture_then_restore() {
        let mut store = SerializedValueStore::new();
        store.begin_capture();
        store.set_active_object(Some(oid(0)));
        let mut count = 5i32;
        let mut label = String::from("hello");
        assert!(store.serialize_property("count", &mut count));
        assert!(store.serialize_property("label", &mut label));

        store.begin_restore();
        store.set_active_object(Some(oid(0)));
        let mut restored_count = 0i32;
        let mut restored_label = String::new();
        store.serialize_property("count", &mut restored_count);
        store.serialize_property("label", &mut restored_label);

        assert_eq!(restored_count, 5);
        assert_eq!(restored_label, "hello");
    }

    #[test]
    fn test_restore_miss_keeps_default() {
        let mut store = SerializedValueStore::new();
        store.begin_restore();
        store.set_active_object(Some(oid(1)));

        let mut label = String::from("default");
        assert!(!store.serialize_property("label", &mut label));
        assert_eq!(label, "default");
    }

    #[test]
    fn test_restore_type_change_keeps_default() {
        let mut store = SerializedValueStore::new();
        store.set_value(oid(0), "count", SerializedValue::String("five".into()));
        store.begin_restore();
        store.set_active_object(Some(oid(0)));

        let mut count = 1i32;
        assert!(!store.serialize_property("count", &mut count));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_no_active_object_is_ignored() {
        let mut store = SerializedValueStore::new();
        let mut count = 3i32;
        assert!(!store.serialize_property("count", &mut count));
        assert!(store.is_empty());
    }

    #[test]
    fn test_selective_clear() {
        let mut store = SerializedValueStore::new();
        store.set_value(oid(0), "a", SerializedValue::Int(1));
        store.set_value(oid(0), "b", SerializedValue::Int(2));
        store.set_value(oid(1), "a", SerializedValue::Int(3));
        assert_eq!(store.len(), 3);

        store.clear_property(oid(0), "a");
        assert!(store.get_value(oid(0), "a").is_none());
        assert_eq!(store.get_value(oid(0), "b"), Some(&SerializedValue::Int(2)));

        store.clear_object(oid(1));
        assert!(!store.has_object(oid(1)));
        assert_eq!(store.object_count(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_value_replaces() {
        let mut store = SerializedValueStore::new();
        store.set_value(oid(0), "a", SerializedValue::Int(1));
        store.set_value(oid(0), "a", SerializedValue::Int(9));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_value(oid(0), "a"), Some(&SerializedValue::Int(9)));
    }
}

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Global custom attributes, merged into every interaction as it finishes.
/// Keys an interaction already set locally win.
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    values: Arc<Mutex<Map<String, Value>>>,
}

impl AttributeStore {
    pub fn set(&self, key: &str, value: Value) -> Option<Value> {
        self.values.lock().insert(key.to_string(), value)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.lock().remove(key)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

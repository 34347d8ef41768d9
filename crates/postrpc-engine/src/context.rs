//! Call context — the write-once-per-key store shared by one call tree.
//!
//! A [`Context`] is created fresh for each top-level `handle()` (or supplied
//! by the caller) and cloned by reference into every middleware, nested
//! engine, and delegated call underneath it. Cloning never copies the
//! entries: all clones see the same map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::ContextError;

/// Call-tree-scoped key/value store.
#[derive(Clone, Default)]
pub struct Context {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context with initial entries.
    pub fn with_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            entries: Arc::new(Mutex::new(map)),
        }
    }

    /// Value for `key`, or `None` if unset.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    /// Value for `key`, failing if unset.
    pub fn assert_get(&self, key: &str) -> Result<Value, ContextError> {
        self.get(key)
            .ok_or_else(|| ContextError::Missing(key.to_string()))
    }

    /// Set `key` once. Setting an existing key fails; delete it first.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), ContextError> {
        let key = key.into();
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(ContextError::AlreadySet(key));
        }
        entries.insert(key, value);
        Ok(())
    }

    /// Remove `key`, returning whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether two handles point at the same store.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Point-in-time copy of all entries.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.keys())
            .finish()
    }
}

/// JSON shape a middleware expects to find under a context key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Any,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    pub fn compatible_with(self, other: ValueKind) -> bool {
        self == Self::Any || other == Self::Any || self == other
    }

    pub fn matches(self, value: &Value) -> bool {
        self.compatible_with(Self::of(value))
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// A context key a middleware reads or writes, with its expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextKey {
    pub name: String,
    pub kind: ValueKind,
}

impl ContextKey {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

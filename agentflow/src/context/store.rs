//! The shared state store.

use super::scope::StateScope;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Key of the session-scoped flag a stage raises to leave a retry loop.
pub const ESCALATE_KEY: &str = "escalate";

/// A scoped key-value store shared by the stages of one run.
///
/// Writes are last-write-wins. Reads of an absent key return the
/// caller-supplied default. Only the orchestrator writes to the store;
/// stages see it through a [`StateView`] and record their writes as a
/// [`StateDelta`].
#[derive(Debug, Default)]
pub struct StateStore {
    data: RwLock<HashMap<String, Value>>,
}

impl StateStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from existing entries.
    #[must_use]
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            data: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Gets a value, or `default` if the key is absent.
    #[must_use]
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.data.read().get(key).cloned().unwrap_or(default)
    }

    /// Gets a value if present.
    #[must_use]
    pub fn get_opt(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Gets a typed value, or `default` if absent or not decodable.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_get_as(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                warn!(key, error = %e, "State value has an unexpected shape, using default");
                default
            }
        }
    }

    /// Gets a typed value, surfacing decode errors.
    pub fn try_get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.get_opt(key).map(serde_json::from_value).transpose()
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Sets a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.write().insert(key.into(), value)
    }

    /// Removes a key.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.write().remove(key)
    }

    /// Applies a stage's buffered writes in order.
    pub fn apply(&self, delta: StateDelta) {
        if delta.is_empty() {
            return;
        }
        let mut data = self.data.write();
        for (key, value) in delta.writes {
            data.insert(key, value);
        }
    }

    /// Removes every key of a scope, returning how many were removed.
    pub fn clear_scope(&self, scope: StateScope) -> usize {
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|key, _| StateScope::from_key(key) != scope);
        before - data.len()
    }

    /// Returns the entries of one scope, ordered by key.
    #[must_use]
    pub fn scope_entries(&self, scope: StateScope) -> BTreeMap<String, Value> {
        self.data
            .read()
            .iter()
            .filter(|(key, _)| StateScope::from_key(key) == scope)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns all keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns a read-only view.
    #[must_use]
    pub fn view(&self) -> StateView<'_> {
        StateView { store: self }
    }
}

/// Read-only access to the state store, handed to stages.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    store: &'a StateStore,
}

impl StateView<'_> {
    /// Gets a value, or `default` if the key is absent.
    #[must_use]
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.store.get(key, default)
    }

    /// Gets a value if present.
    #[must_use]
    pub fn get_opt(&self, key: &str) -> Option<Value> {
        self.store.get_opt(key)
    }

    /// Gets a typed value, or `default` if absent or not decodable.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.store.get_as(key, default)
    }

    /// Gets a typed value, surfacing decode errors.
    pub fn try_get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.store.try_get_as(key)
    }

    /// Gets a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.store
            .get_opt(key)
            .and_then(|v| v.as_str().map(ToString::to_string))
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }
}

/// Ordered writes buffered by a stage, applied after it returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    writes: Vec<(String, Value)>,
}

impl StateDelta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.writes.push((key.into(), value));
    }

    /// Returns the last value written to a key, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.writes.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns the number of buffered writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Iterates over the writes in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.writes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

//! In-memory concurrent configuration layer

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};

use crate::core::value::{expand, normalize};
use crate::core::{
    ConfigError, ConfigEvent, ConfigListener, ConfigResult, Configuration, DEFAULT_LIST_DELIMITER,
    EventKind, Listeners, SubscriptionId, Value, check_key,
};

// ---------------------------------------------------------------------------
// LockPartition
// ---------------------------------------------------------------------------

/// Fixed array of re-entrant locks indexed by `hash(key) % N`.
///
/// Writers to one key always take the same lock, so the read-decide-write
/// of a list append and the before/after event pair around it are never
/// interleaved with another writer of that key. Re-entrancy lets a
/// listener running under the lock write back to the same layer.
pub struct LockPartition {
    locks: Box<[ReentrantMutex<()>]>,
}

impl LockPartition {
    /// Partition size used by [`ConcurrentMapConfiguration`].
    pub const DEFAULT_SIZE: usize = 64;

    /// Create a partition with `size` locks (at least one).
    pub fn new(size: usize) -> Self {
        let locks = (0..size.max(1)).map(|_| ReentrantMutex::new(())).collect();
        Self { locks }
    }

    /// Lock the slot owning `key`.
    pub fn lock(&self, key: &str) -> ReentrantMutexGuard<'_, ()> {
        self.locks[self.index(key)].lock()
    }

    /// Slot index for `key`.
    pub fn index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.locks.len() as u64) as usize
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Always `false`; a partition has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for LockPartition {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}

impl fmt::Debug for LockPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockPartition")
            .field("size", &self.locks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LayerOptions
// ---------------------------------------------------------------------------

/// Per-layer behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerOptions {
    /// Delimiter used to split string values; `None` disables splitting.
    pub list_delimiter: Option<char>,
}

impl LayerOptions {
    /// Options with delimiter parsing turned off.
    pub fn without_delimiter() -> Self {
        Self {
            list_delimiter: None,
        }
    }

    /// Use `delimiter` to split string values.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.list_delimiter = Some(delimiter);
        self
    }
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            list_delimiter: Some(DEFAULT_LIST_DELIMITER),
        }
    }
}

// ---------------------------------------------------------------------------
// ConcurrentMapConfiguration
// ---------------------------------------------------------------------------

/// Configuration layer backed by a concurrent map.
///
/// Reads never block; writes to one key are serialized through a
/// [`LockPartition`]. `add_property` appends, turning a scalar into a list
/// on the second add; `set_property` replaces.
pub struct ConcurrentMapConfiguration {
    map: DashMap<String, Value>,
    locks: LockPartition,
    options: LayerOptions,
    listeners: Listeners,
}

impl ConcurrentMapConfiguration {
    /// Create an empty layer with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(LayerOptions::default())
    }

    /// Create an empty layer with the given options.
    #[must_use]
    pub fn with_options(options: LayerOptions) -> Self {
        Self {
            map: DashMap::new(),
            locks: LockPartition::default(),
            options,
            listeners: Listeners::new(),
        }
    }

    /// Create a layer pre-populated from `properties` without emitting
    /// events. Null values are skipped.
    pub fn from_properties<I, K>(properties: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let layer = Self::new();
        for (key, value) in properties {
            let key = key.into();
            check_key(&key)?;
            if value.is_null() {
                continue;
            }
            let stored = normalize(value, layer.options.list_delimiter);
            layer.map.insert(key, stored);
        }
        Ok(layer)
    }

    /// Layer options.
    pub fn options(&self) -> LayerOptions {
        self.options
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn append(&self, key: &str, element: Value) {
        match self.map.get_mut(key) {
            Some(mut existing) => match existing.value_mut() {
                Value::Array(items) => items.push(element),
                other => {
                    let previous = std::mem::take(other);
                    *other = Value::Array(vec![previous, element]);
                }
            },
            None => {
                self.map.insert(key.to_owned(), element);
            }
        }
    }
}

impl Configuration for ConcurrentMapConfiguration {
    fn get_property(&self, key: &str) -> Option<Value> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn add_property(&self, key: &str, value: Value) -> ConfigResult<()> {
        check_key(key)?;
        if value.is_null() {
            return Err(ConfigError::null_value(key));
        }

        let _guard = self.locks.lock(key);
        self.listeners.fire(&ConfigEvent::before(
            EventKind::AddProperty,
            Some(key),
            Some(&value),
        ))?;
        let elements = expand(value.clone(), self.options.list_delimiter);
        if elements.is_empty() {
            // An empty sequence still makes the key present.
            self.map
                .entry(key.to_owned())
                .or_insert_with(|| Value::Array(Vec::new()));
        }
        for element in elements {
            self.append(key, element);
        }
        self.listeners.fire(&ConfigEvent::after(
            EventKind::AddProperty,
            Some(key),
            Some(&value),
        ))
    }

    fn set_property(&self, key: &str, value: Value) -> ConfigResult<()> {
        check_key(key)?;
        if value.is_null() {
            return Err(ConfigError::null_value(key));
        }

        let _guard = self.locks.lock(key);
        self.listeners.fire(&ConfigEvent::before(
            EventKind::SetProperty,
            Some(key),
            Some(&value),
        ))?;
        self.map.insert(
            key.to_owned(),
            normalize(value.clone(), self.options.list_delimiter),
        );
        self.listeners.fire(&ConfigEvent::after(
            EventKind::SetProperty,
            Some(key),
            Some(&value),
        ))
    }

    fn clear_property(&self, key: &str) -> ConfigResult<()> {
        check_key(key)?;

        let _guard = self.locks.lock(key);
        self.listeners
            .fire(&ConfigEvent::before(EventKind::ClearProperty, Some(key), None))?;
        self.map.remove(key);
        self.listeners
            .fire(&ConfigEvent::after(EventKind::ClearProperty, Some(key), None))
    }

    fn clear(&self) -> ConfigResult<()> {
        self.listeners
            .fire(&ConfigEvent::before(EventKind::Clear, None, None))?;
        self.map.clear();
        self.listeners
            .fire(&ConfigEvent::after(EventKind::Clear, None, None))
    }

    fn list_delimiter(&self) -> Option<char> {
        self.options.list_delimiter
    }

    fn subscribe(&self, listener: ConfigListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

impl Default for ConcurrentMapConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConcurrentMapConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentMapConfiguration")
            .field("keys", &self.map.len())
            .field("list_delimiter", &self.options.list_delimiter)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

//! Typed property handles

use std::fmt;
use std::sync::Arc;

use super::cache::PropertyType;
use super::cached::CachedProperty;
use crate::core::{ConfigResult, SubscriptionId};

/// A [`CachedProperty`] read as `T`, with a fallback value.
///
/// Reads never fail: an absent or malformed value yields the default.
#[derive(Clone)]
pub struct Property<T: PropertyType> {
    cached: Arc<CachedProperty>,
    default: T,
}

impl<T: PropertyType> Property<T> {
    /// Wrap `cached`, falling back to `default`.
    pub fn new(cached: Arc<CachedProperty>, default: T) -> Self {
        Self { cached, default }
    }

    /// Current value, or the default.
    pub fn get(&self) -> T {
        self.cached.get_or_default(self.default.clone())
    }

    /// Current value without falling back; parse failures are returned.
    pub fn try_get(&self) -> ConfigResult<Option<T>> {
        self.cached.get::<T>()
    }

    /// The fallback value.
    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Property name.
    pub fn name(&self) -> &str {
        self.cached.name()
    }

    /// Underlying shared property.
    pub fn cached(&self) -> &Arc<CachedProperty> {
        &self.cached
    }

    /// Run `callback` with the new value whenever the raw value changes.
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let default = self.default.clone();
        self.cached
            .on_change(move |cached| callback(cached.get_or_default(default.clone())))
    }
}

impl<T: PropertyType + fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name())
            .field("value", &self.get())
            .field("default", &self.default)
            .finish()
    }
}

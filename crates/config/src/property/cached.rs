//! Named, auto-updating property value

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::cache::{PropertyType, ValueCache};
use crate::core::{ConfigError, ConfigResult, Listeners, SubscriptionId};

/// Callback invoked after a property's raw value changed.
pub type PropertyCallback = Arc<dyn Fn(&CachedProperty) + Send + Sync>;

/// Check run against a candidate raw value before it is written.
pub type PropertyValidator = Arc<dyn Fn(&str) -> ConfigResult<()> + Send + Sync>;

/// A named property whose value follows the installed configuration.
///
/// Instances are created and kept up to date by a
/// [`PropertyRegistry`](super::PropertyRegistry); one name maps to one
/// shared instance.
pub struct CachedProperty {
    name: String,
    cache: ValueCache,
    changed_at: RwLock<DateTime<Utc>>,
    callbacks: Listeners<dyn Fn(&CachedProperty) + Send + Sync>,
    validators: RwLock<Vec<PropertyValidator>>,
}

impl CachedProperty {
    pub(crate) fn new(name: impl Into<String>, raw: Option<String>) -> Self {
        Self {
            name: name.into(),
            cache: ValueCache::new(raw),
            changed_at: RwLock::new(Utc::now()),
            callbacks: Listeners::new(),
            validators: RwLock::new(Vec::new()),
        }
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current raw string, `None` when the key is absent.
    pub fn raw(&self) -> Option<String> {
        self.cache.raw()
    }

    /// Typed value; `None` when absent, a parse error when malformed.
    pub fn get<T: PropertyType>(&self) -> ConfigResult<Option<T>> {
        self.cache.get::<T>()
    }

    /// Typed value, falling back to `default` on absence or parse failure.
    pub fn get_or_default<T: PropertyType>(&self, default: T) -> T {
        self.cache.get_or_default(default)
    }

    /// When the raw value last changed (or the property was created).
    pub fn changed_at(&self) -> DateTime<Utc> {
        *self.changed_at.read()
    }

    /// Store a new raw value. Subscribers run only if it differs from the
    /// current one.
    pub(crate) fn update(&self, raw: Option<String>) -> bool {
        if !self.cache.set(raw) {
            return false;
        }
        *self.changed_at.write() = Utc::now();
        tracing::debug!(property = %self.name, "property value changed");
        for callback in self.callbacks.snapshot() {
            callback(self);
        }
        true
    }

    /// Register a change callback.
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&CachedProperty) + Send + Sync + 'static,
    {
        let callback: PropertyCallback = Arc::new(callback);
        self.callbacks.subscribe(callback)
    }

    /// Remove a change callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks.unsubscribe(id)
    }

    /// Detach every change callback; the value is unaffected.
    pub fn clear_subscribers(&self) {
        self.callbacks.clear();
    }

    /// Number of change callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Register a check for values written to this property.
    ///
    /// A failing check vetoes the write at the configuration level.
    pub fn add_validator<F>(&self, validator: F)
    where
        F: Fn(&str) -> ConfigResult<()> + Send + Sync + 'static,
    {
        self.validators.write().push(Arc::new(validator));
    }

    /// Run every validator against `candidate`.
    pub fn validate(&self, candidate: &str) -> ConfigResult<()> {
        let validators = self.validators.read().clone();
        for validator in validators {
            validator(candidate).map_err(|e| match e {
                ConfigError::ValidationError { field: Some(_), .. } => e,
                ConfigError::ValidationError { message, field: None } => {
                    ConfigError::validation_with_field(message, self.name.clone())
                }
                other => ConfigError::validation_with_field(other.to_string(), self.name.clone()),
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for CachedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedProperty")
            .field("name", &self.name)
            .field("raw", &self.raw())
            .field("changed_at", &self.changed_at())
            .field("subscribers", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn callbacks_fire_only_on_change() {
        let property = CachedProperty::new("timeout", Some("10".into()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        property.on_change(move |p| {
            assert_eq!(p.name(), "timeout");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!property.update(Some("10".into())));
        assert!(property.update(Some("20".into())));
        assert!(property.update(None));
        assert!(!property.update(None));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_subscribers_keeps_value() {
        let property = CachedProperty::new("p", Some("1".into()));
        property.on_change(|_| {});
        property.clear_subscribers();
        assert_eq!(property.subscriber_count(), 0);
        assert_eq!(property.get::<i32>().unwrap(), Some(1));
    }

    #[test]
    fn update_advances_timestamp_and_refreshes_cache() {
        let property = CachedProperty::new("ratio", Some("0.5".into()));
        let created = property.changed_at();
        assert_eq!(property.get::<f64>().unwrap(), Some(0.5));
        property.update(Some("0.75".into()));
        assert!(property.changed_at() >= created);
        assert_eq!(property.get::<f64>().unwrap(), Some(0.75));
    }

    #[test]
    fn validators_are_attributed_to_the_property() {
        let property = CachedProperty::new("port", None);
        property.add_validator(|raw| {
            let port: i32 = i32::parse_raw(raw)?;
            if port > 0 {
                Ok(())
            } else {
                Err(ConfigError::validation_error("port must be positive", None))
            }
        });
        assert!(property.validate("8080").is_ok());

        let err = property.validate("-1").unwrap_err();
        assert_eq!(
            err,
            ConfigError::validation_with_field("port must be positive", "port")
        );
        assert!(property.validate("abc").unwrap_err().is_validation());
    }
}

//! Read-only view over another configuration

use std::fmt;
use std::sync::Arc;

use crate::core::{
    ConfigError, ConfigListener, ConfigResult, Configuration, SubscriptionId, Value,
};

/// Wraps a configuration and rejects every mutation made through it.
///
/// Changes made to the wrapped configuration directly are still visible,
/// and listeners subscribed here observe them.
#[derive(Clone)]
pub struct ReadOnlyConfiguration {
    inner: Arc<dyn Configuration>,
}

impl ReadOnlyConfiguration {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn Configuration>) -> Self {
        Self { inner }
    }

    /// The wrapped configuration.
    pub fn inner(&self) -> &Arc<dyn Configuration> {
        &self.inner
    }

    fn rejected(operation: &str) -> ConfigError {
        ConfigError::invalid_operation(format!("{operation} on a read-only configuration"))
    }
}

impl Configuration for ReadOnlyConfiguration {
    fn get_property(&self, key: &str) -> Option<Value> {
        self.inner.get_property(key)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn add_property(&self, _key: &str, _value: Value) -> ConfigResult<()> {
        Err(Self::rejected("add_property"))
    }

    fn set_property(&self, _key: &str, _value: Value) -> ConfigResult<()> {
        Err(Self::rejected("set_property"))
    }

    fn clear_property(&self, _key: &str) -> ConfigResult<()> {
        Err(Self::rejected("clear_property"))
    }

    fn clear(&self) -> ConfigResult<()> {
        Err(Self::rejected("clear"))
    }

    fn list_delimiter(&self) -> Option<char> {
        self.inner.list_delimiter()
    }

    fn subscribe(&self, listener: ConfigListener) -> SubscriptionId {
        self.inner.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }
}

impl fmt::Debug for ReadOnlyConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyConfiguration")
            .field("keys", &self.inner.keys().len())
            .finish()
    }
}

//! Core traits for configuration system

use super::event::{ConfigListener, SubscriptionId};
use super::value::{Snapshot, Value, list_elements, to_raw_string};
use super::{ConfigError, ConfigResult};
use crate::watchers::{Checkpoint, PollResult, UpdateResult};
use std::sync::Arc;

/// Read/write contract shared by every configuration implementation.
///
/// All methods take `&self`: implementations are shared behind `Arc` and
/// use interior synchronization. Every mutation emits a before/after
/// [`ConfigEvent`](super::event::ConfigEvent) pair to subscribed listeners.
pub trait Configuration: Send + Sync {
    /// Current value of `key`, or `None` if absent.
    fn get_property(&self, key: &str) -> Option<Value>;

    /// Whether `key` is present.
    fn contains_key(&self, key: &str) -> bool;

    /// All keys currently present.
    fn keys(&self) -> Vec<String>;

    /// Whether the configuration holds no keys.
    fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Append `value` to `key`, splitting delimited strings into elements.
    fn add_property(&self, key: &str, value: Value) -> ConfigResult<()>;

    /// Replace the value of `key`.
    fn set_property(&self, key: &str, value: Value) -> ConfigResult<()>;

    /// Remove `key`.
    fn clear_property(&self, key: &str) -> ConfigResult<()>;

    /// Remove every key.
    fn clear(&self) -> ConfigResult<()>;

    /// Delimiter used to split string values, `None` when disabled.
    fn list_delimiter(&self) -> Option<char>;

    /// Register a change listener.
    fn subscribe(&self, listener: ConfigListener) -> SubscriptionId;

    /// Remove a change listener.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Layer that actually stores this configuration's writes, when that is
    /// not the configuration itself.
    ///
    /// A composite answers with the layer its `add`/`set`/`clear` calls land
    /// in; plain stores keep the default `None`.
    fn write_target(&self) -> Option<Arc<dyn Configuration>> {
        None
    }

    /// Value of `key` as an ordered list of elements.
    fn get_list(&self, key: &str) -> Vec<Value> {
        self.get_property(key)
            .map(|value| list_elements(&value))
            .unwrap_or_default()
    }

    /// Raw string form of `key`; sequences are joined with `,`.
    fn get_string(&self, key: &str) -> Option<String> {
        self.get_property(key).as_ref().and_then(to_raw_string)
    }

    /// Elements of `key` rendered as strings, in list order.
    fn get_string_array(&self, key: &str) -> Vec<String> {
        self.get_list(key).iter().filter_map(to_raw_string).collect()
    }
}

/// Reject null or empty keys before any mutation takes place.
pub(crate) fn check_key(key: &str) -> ConfigResult<()> {
    if key.is_empty() {
        Err(ConfigError::empty_key())
    } else {
        Ok(())
    }
}

/// A source that is asked for its content on a schedule.
pub trait PolledSource: Send + Sync {
    /// Fetch the current content.
    ///
    /// `initial` is `true` for the first call made by a scheduler;
    /// `checkpoint` is the token returned by the previous poll, if any.
    fn poll(&self, initial: bool, checkpoint: Option<&Checkpoint>) -> ConfigResult<PollResult>;

    /// Human-readable source name used in logs and errors.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_owned()
    }
}

/// Listener receiving pushed updates from a [`WatchedSource`].
pub type UpdateListener = Arc<dyn Fn(&UpdateResult) + Send + Sync>;

/// A source that pushes updates as they happen.
pub trait WatchedSource: Send + Sync {
    /// Initial snapshot of all keys.
    fn current_data(&self) -> ConfigResult<Snapshot>;

    /// Register an update listener.
    fn subscribe(&self, listener: UpdateListener) -> SubscriptionId;

    /// Remove an update listener.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Bridge between a configuration and the cached-property layer.
pub trait PropertySupport: Send + Sync {
    /// Raw string value of `name`; any internal failure reads as absent.
    fn get_string(&self, name: &str) -> Option<String>;

    /// Register a change listener on the underlying configuration.
    fn subscribe(&self, listener: ConfigListener) -> SubscriptionId;

    /// Remove a change listener.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

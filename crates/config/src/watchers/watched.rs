//! Configuration layer fed by a push-based source

use std::fmt;
use std::sync::Arc;

use crate::core::{
    ConfigListener, ConfigResult, ConfigResultExt, Configuration, SubscriptionId, UpdateListener,
    Value, WatchedSource,
};
use crate::layers::{ConcurrentMapConfiguration, LayerOptions};
use crate::reconcile::UpdateReconciler;
use crate::watchers::UpdateResult;

/// In-memory layer that applies every update a [`WatchedSource`] pushes.
///
/// The source's current data is loaded as a full result on construction.
/// Dropping the layer unsubscribes it from the source.
pub struct WatchedConfiguration {
    store: Arc<ConcurrentMapConfiguration>,
    source: Arc<dyn WatchedSource>,
    subscription: SubscriptionId,
    ignore_deletes: bool,
}

impl WatchedConfiguration {
    /// Load `source` and follow its updates.
    pub fn new(source: Arc<dyn WatchedSource>, ignore_deletes: bool) -> ConfigResult<Self> {
        Self::with_options(source, ignore_deletes, LayerOptions::default())
    }

    /// Like [`new`](Self::new) with explicit layer options.
    pub fn with_options(
        source: Arc<dyn WatchedSource>,
        ignore_deletes: bool,
        options: LayerOptions,
    ) -> ConfigResult<Self> {
        let store = Arc::new(ConcurrentMapConfiguration::with_options(options));
        let current = source
            .current_data()
            .with_context(|| "initial load of watched source failed".to_string())?;
        UpdateReconciler::apply(Some(&UpdateResult::full(current)), store.as_ref(), ignore_deletes);

        let target = Arc::clone(&store);
        let on_update: UpdateListener = Arc::new(move |update: &UpdateResult| {
            UpdateReconciler::apply(Some(update), target.as_ref(), ignore_deletes);
        });
        let subscription = source.subscribe(on_update);

        Ok(Self {
            store,
            source,
            subscription,
            ignore_deletes,
        })
    }

    /// Whether keys missing from full updates are kept.
    pub fn ignore_deletes(&self) -> bool {
        self.ignore_deletes
    }
}

impl Configuration for WatchedConfiguration {
    fn get_property(&self, key: &str) -> Option<Value> {
        self.store.get_property(key)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    fn add_property(&self, key: &str, value: Value) -> ConfigResult<()> {
        self.store.add_property(key, value)
    }

    fn set_property(&self, key: &str, value: Value) -> ConfigResult<()> {
        self.store.set_property(key, value)
    }

    fn clear_property(&self, key: &str) -> ConfigResult<()> {
        self.store.clear_property(key)
    }

    fn clear(&self) -> ConfigResult<()> {
        self.store.clear()
    }

    fn list_delimiter(&self) -> Option<char> {
        self.store.list_delimiter()
    }

    fn subscribe(&self, listener: ConfigListener) -> SubscriptionId {
        self.store.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }
}

impl Drop for WatchedConfiguration {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscription);
    }
}

impl fmt::Debug for WatchedConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedConfiguration")
            .field("keys", &self.store.len())
            .field("subscription", &self.subscription)
            .field("ignore_deletes", &self.ignore_deletes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Listeners, Snapshot};
    use serde_json::json;

    #[derive(Default)]
    struct PushSource {
        data: Snapshot,
        listeners: Listeners<dyn Fn(&UpdateResult) + Send + Sync>,
    }

    impl PushSource {
        fn push(&self, update: &UpdateResult) {
            for listener in self.listeners.snapshot() {
                listener(update);
            }
        }
    }

    impl WatchedSource for PushSource {
        fn current_data(&self) -> ConfigResult<Snapshot> {
            Ok(self.data.clone())
        }

        fn subscribe(&self, listener: UpdateListener) -> SubscriptionId {
            self.listeners.subscribe(listener)
        }

        fn unsubscribe(&self, id: SubscriptionId) -> bool {
            self.listeners.unsubscribe(id)
        }
    }

    #[test]
    fn loads_current_data_and_follows_pushes() {
        let mut data = Snapshot::new();
        data.insert("a".into(), json!("1"));
        let source = Arc::new(PushSource {
            data,
            ..PushSource::default()
        });
        let config = WatchedConfiguration::new(source.clone(), false).unwrap();
        assert_eq!(config.get_property("a"), Some(json!("1")));

        let mut added = Snapshot::new();
        added.insert("b".into(), json!("2"));
        let mut deleted = Snapshot::new();
        deleted.insert("a".into(), Value::Null);
        source.push(&UpdateResult::incremental(added, Snapshot::new(), deleted));

        assert_eq!(config.get_property("b"), Some(json!("2")));
        assert!(!config.contains_key("a"));

        drop(config);
        assert!(source.listeners.is_empty());
    }
}

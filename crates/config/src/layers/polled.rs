//! Configuration layer fed by a polling scheduler

use std::fmt;
use std::sync::Arc;

use super::concurrent::{ConcurrentMapConfiguration, LayerOptions};
use crate::core::{
    ConfigListener, ConfigResult, Configuration, PolledSource, SubscriptionId, Value,
};
use crate::watchers::{PollingOptions, PollingScheduler};

/// In-memory layer whose content is kept in sync with a [`PolledSource`].
///
/// Construction performs the initial load; later polls run in the
/// background until [`stop`](Self::stop) is called or the value is dropped.
/// Direct writes are allowed but the next poll may undo them.
pub struct PolledConfiguration {
    store: Arc<ConcurrentMapConfiguration>,
    scheduler: PollingScheduler,
}

impl PolledConfiguration {
    /// Load `source` and start polling it with `options`.
    pub fn start(source: Arc<dyn PolledSource>, options: PollingOptions) -> ConfigResult<Self> {
        Self::start_with(source, options, LayerOptions::default())
    }

    /// Like [`start`](Self::start) with explicit layer options.
    pub fn start_with(
        source: Arc<dyn PolledSource>,
        options: PollingOptions,
        layer: LayerOptions,
    ) -> ConfigResult<Self> {
        let store = Arc::new(ConcurrentMapConfiguration::with_options(layer));
        let scheduler = PollingScheduler::new(options);
        scheduler.start_polling(source, store.clone())?;
        Ok(Self { store, scheduler })
    }

    /// The scheduler feeding this layer.
    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    /// Stop background polling; the current content is kept.
    pub fn stop(&self) {
        self.scheduler.stop_polling();
    }
}

impl Configuration for PolledConfiguration {
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

impl fmt::Debug for PolledConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolledConfiguration")
            .field("keys", &self.store.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Snapshot;
    use crate::watchers::{Checkpoint, PollResult};
    use serde_json::json;

    struct Static;

    impl PolledSource for Static {
        fn poll(&self, initial: bool, _checkpoint: Option<&Checkpoint>) -> ConfigResult<PollResult> {
            let mut complete = Snapshot::new();
            complete.insert("initial".into(), json!(initial));
            Ok(PollResult::full(complete))
        }
    }

    #[tokio::test]
    async fn construction_performs_initial_load() {
        let config = PolledConfiguration::start(Arc::new(Static), PollingOptions::default()).unwrap();
        assert_eq!(config.get_property("initial"), Some(json!(true)));
        assert!(config.scheduler().is_active());
        config.stop();
        assert!(!config.scheduler().is_active());
    }
}

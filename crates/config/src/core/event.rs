//! Two-phase change events and listener lists
//!
//! Every mutation of a configuration emits a [`ConfigEvent`] twice: once
//! before the change is applied and once after. Listeners are invoked
//! synchronously on the writing thread from a snapshot of the subscriber
//! list, so a listener may unsubscribe itself (or others) while running.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use super::value::Value;
use super::{ConfigError, ConfigResult};

// ---------------------------------------------------------------------------
// ConfigEvent
// ---------------------------------------------------------------------------

/// Kind of mutation a [`ConfigEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A value was appended to a key.
    AddProperty,
    /// A key's value was replaced.
    SetProperty,
    /// A key was removed.
    ClearProperty,
    /// Every key was removed.
    Clear,
    /// The set of layers backing a configuration changed wholesale.
    SourceChanged,
}

impl EventKind {
    /// Whether the event targets a single key.
    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            Self::AddProperty | Self::SetProperty | Self::ClearProperty
        )
    }
}

/// A change notification emitted around a configuration mutation.
///
/// Listeners must tolerate a `before` event for an operation that later
/// fails or turns out to be a no-op.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEvent {
    /// What happened.
    pub kind: EventKind,
    /// Affected key; `None` for [`EventKind::Clear`] and
    /// [`EventKind::SourceChanged`].
    pub key: Option<String>,
    /// Value written, if any.
    pub value: Option<Value>,
    /// `true` for the notification sent before the mutation.
    pub before_update: bool,
}

impl ConfigEvent {
    /// Create the pre-mutation event.
    pub fn before(kind: EventKind, key: Option<&str>, value: Option<&Value>) -> Self {
        Self::new(kind, key, value, true)
    }

    /// Create the post-mutation event.
    pub fn after(kind: EventKind, key: Option<&str>, value: Option<&Value>) -> Self {
        Self::new(kind, key, value, false)
    }

    fn new(kind: EventKind, key: Option<&str>, value: Option<&Value>, before_update: bool) -> Self {
        Self {
            kind,
            key: key.map(str::to_owned),
            value: value.cloned(),
            before_update,
        }
    }

    /// Same event with a different phase.
    #[must_use]
    pub fn with_phase(mut self, before_update: bool) -> Self {
        self.before_update = before_update;
        self
    }

    /// Whether this is the post-mutation notification.
    pub fn is_after(&self) -> bool {
        !self.before_update
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Change listener callback.
///
/// Returning a [`ConfigError::ValidationError`] from a `before` event vetoes
/// the mutation; any other error is logged and ignored.
pub type ConfigListener = Arc<dyn Fn(&ConfigEvent) -> ConfigResult<()> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Subscriber list shared by every configuration implementation.
pub struct Listeners<L: ?Sized = dyn Fn(&ConfigEvent) -> ConfigResult<()> + Send + Sync> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriptionId, Arc<L>)>>,
}

impl<L: ?Sized> Listeners<L> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: Arc<L>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of the current listeners, taken without holding the lock
    /// during dispatch.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl Listeners {
    /// Deliver `event` to every listener.
    ///
    /// For a `before` event the first validation error stops dispatch and
    /// is returned. All other listener errors are logged.
    pub fn fire(&self, event: &ConfigEvent) -> ConfigResult<()> {
        for listener in self.snapshot() {
            match listener(event) {
                Ok(()) => {}
                Err(err) if event.before_update && err.is_validation() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        kind = ?event.kind,
                        key = event.key.as_deref().unwrap_or_default(),
                        error = %err,
                        "configuration listener failed"
                    );
                }
            }
        }
        Ok(())
    }
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for Listeners<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

/// Convenience wrapper turning a closure into a [`ConfigListener`].
pub fn listener<F>(f: F) -> ConfigListener
where
    F: Fn(&ConfigEvent) -> ConfigResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Validation veto helper for `before` listeners.
pub fn veto(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::validation_with_field(message, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: &Arc<AtomicUsize>) -> ConfigListener {
        let counter = Arc::clone(counter);
        listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn fire_reaches_every_listener() {
        let listeners: Listeners = Listeners::new();
        let counter = Arc::new(AtomicUsize::new(0));
        listeners.subscribe(counting(&counter));
        listeners.subscribe(counting(&counter));

        let event = ConfigEvent::after(EventKind::SetProperty, Some("a"), None);
        listeners.fire(&event).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let listeners: Listeners = Listeners::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = listeners.subscribe(counting(&counter));
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));

        listeners
            .fire(&ConfigEvent::after(EventKind::Clear, None, None))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(listeners.is_empty());
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_dispatch() {
        let listeners: Arc<Listeners> = Arc::new(Listeners::new());
        let slot = Arc::new(parking_lot::Mutex::new(None::<SubscriptionId>));
        let calls = Arc::new(AtomicUsize::new(0));

        let id = {
            let listeners_ref = Arc::clone(&listeners);
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            listeners.subscribe(listener(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *slot.lock() {
                    listeners_ref.unsubscribe(id);
                }
                Ok(())
            }))
        };
        *slot.lock() = Some(id);

        let event = ConfigEvent::after(EventKind::AddProperty, Some("k"), None);
        listeners.fire(&event).unwrap();
        listeners.fire(&event).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn before_phase_validation_error_vetoes() {
        let listeners: Listeners = Listeners::new();
        listeners.subscribe(listener(|event| match event.key.as_deref() {
            Some(key) => Err(veto(key, "rejected")),
            None => Ok(()),
        }));

        let before = ConfigEvent::before(EventKind::SetProperty, Some("a"), None);
        assert!(listeners.fire(&before).unwrap_err().is_validation());

        // after-phase errors are only logged
        assert!(listeners.fire(&before.with_phase(false)).is_ok());
    }
}

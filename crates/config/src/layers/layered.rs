//! Layered (composite) configuration
//!
//! A [`LayeredConfiguration`] resolves each key through an ordered list of
//! child layers. Two layers are special:
//!
//! - the **override layer** is consulted before every other layer and is
//!   written only through [`LayeredConfiguration::set_override_property`];
//! - the **container layer** is one member of the ordered list and receives
//!   every write made through the composite's own `add`/`set`/`clear` API.
//!
//! Child change events are re-emitted at the composite level only when the
//! change is visible through the composite.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::RwLock;

use super::concurrent::{ConcurrentMapConfiguration, LayerOptions};
use crate::core::{
    ConfigError, ConfigEvent, ConfigListener, ConfigResult, Configuration, EventKind, Listeners,
    SubscriptionId, Value, listener,
};

/// Stable identity of a layer, derived from its allocation.
fn layer_id(layer: &Arc<dyn Configuration>) -> usize {
    Arc::as_ptr(layer).cast::<()>() as usize
}

struct LayerEntry {
    name: Option<String>,
    layer: Arc<dyn Configuration>,
    subscription: SubscriptionId,
}

struct LayerState {
    layers: Vec<LayerEntry>,
    container: Arc<dyn Configuration>,
    override_layer: Arc<ConcurrentMapConfiguration>,
    override_subscription: SubscriptionId,
    /// Set once the container position has been chosen explicitly.
    container_customized: bool,
}

impl LayerState {
    fn position(&self, layer: &Arc<dyn Configuration>) -> Option<usize> {
        let id = layer_id(layer);
        self.layers.iter().position(|e| layer_id(&e.layer) == id)
    }

    fn container_index(&self) -> usize {
        self.position(&self.container).unwrap_or(0)
    }

    fn is_container(&self, layer: &Arc<dyn Configuration>) -> bool {
        layer_id(layer) == layer_id(&self.container)
    }

    fn check_name(&self, name: Option<&str>) -> ConfigResult<()> {
        match name {
            Some(name) if self.layers.iter().any(|e| e.name.as_deref() == Some(name)) => Err(
                ConfigError::invalid_argument(format!("layer name '{name}' is already in use")),
            ),
            _ => Ok(()),
        }
    }
}

/// Override layer, ordered layers, container, and whether its position was customized.
type LayerSnapshot = (
    Arc<dyn Configuration>,
    Vec<Arc<dyn Configuration>>,
    Arc<dyn Configuration>,
    bool,
);

struct LayeredInner {
    state: RwLock<LayerState>,
    listeners: Listeners,
    options: LayerOptions,
}

impl LayeredInner {
    fn resolve(&self, key: &str) -> Option<Arc<dyn Configuration>> {
        let state = self.state.read();
        if state.override_layer.contains_key(key) {
            let layer: Arc<dyn Configuration> = state.override_layer.clone();
            return Some(layer);
        }
        state
            .layers
            .iter()
            .find(|e| e.layer.contains_key(key))
            .map(|e| Arc::clone(&e.layer))
    }

    /// Re-emit a child event at the composite level.
    fn on_layer_changed(&self, source: usize, event: &ConfigEvent) -> ConfigResult<()> {
        // The winning layer is unknown until the write lands.
        if event.before_update {
            return self.listeners.fire(event);
        }
        let Some(key) = event.key.as_deref() else {
            return self.listeners.fire(event);
        };

        match self.resolve(key) {
            None => self.listeners.fire(event),
            Some(owner) if layer_id(&owner) == source => self.listeners.fire(event),
            Some(owner) if event.kind == EventKind::ClearProperty => {
                let effective = owner.get_property(key);
                self.listeners.fire(&ConfigEvent::after(
                    EventKind::SetProperty,
                    Some(key),
                    effective.as_ref(),
                ))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Ordered composite of configuration layers with override precedence.
///
/// Cloning is cheap and yields a handle to the same composite.
#[derive(Clone)]
pub struct LayeredConfiguration {
    inner: Arc<LayeredInner>,
}

impl LayeredConfiguration {
    /// Create a composite holding only an empty container layer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(LayerOptions::default())
    }

    /// Create a composite whose container and override layers use `options`.
    #[must_use]
    pub fn with_options(options: LayerOptions) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<LayeredInner>| {
            LayeredInner {
                state: RwLock::new(Self::fresh_state(weak, options)),
                listeners: Listeners::new(),
                options,
            }
        });
        Self { inner }
    }

    /// Build the initial layer list: one container, one override layer.
    fn fresh_state(weak: &Weak<LayeredInner>, options: LayerOptions) -> LayerState {
        let container: Arc<dyn Configuration> =
            Arc::new(ConcurrentMapConfiguration::with_options(options));
        let override_layer = Arc::new(ConcurrentMapConfiguration::with_options(options));

        let container_subscription = Self::attach_with(weak, &container);
        let override_dyn: Arc<dyn Configuration> = override_layer.clone();
        let override_subscription = Self::attach_with(weak, &override_dyn);

        LayerState {
            layers: vec![LayerEntry {
                name: None,
                layer: Arc::clone(&container),
                subscription: container_subscription,
            }],
            container,
            override_layer,
            override_subscription,
            container_customized: false,
        }
    }

    fn attach_with(weak: &Weak<LayeredInner>, layer: &Arc<dyn Configuration>) -> SubscriptionId {
        let weak = weak.clone();
        let source = layer_id(layer);
        layer.subscribe(listener(move |event| match weak.upgrade() {
            Some(inner) => inner.on_layer_changed(source, event),
            None => Ok(()),
        }))
    }

    fn attach(&self, layer: &Arc<dyn Configuration>) -> SubscriptionId {
        Self::attach_with(&Arc::downgrade(&self.inner), layer)
    }

    fn fire_source_changed<F>(&self, mutate: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut LayerState) -> ConfigResult<bool>,
    {
        self.inner
            .listeners
            .fire(&ConfigEvent::before(EventKind::SourceChanged, None, None))?;
        let changed = mutate(&mut self.inner.state.write())?;
        if changed {
            self.inner
                .listeners
                .fire(&ConfigEvent::after(EventKind::SourceChanged, None, None))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Layer management
    // -----------------------------------------------------------------------

    /// Add a layer with the lowest priority, or just above the container
    /// once the container position has been customized.
    ///
    /// Adding a layer that is already a member does nothing.
    pub fn add_layer(&self, layer: Arc<dyn Configuration>, name: Option<&str>) -> ConfigResult<()> {
        let index = {
            let state = self.inner.state.read();
            if state.container_customized {
                state.container_index()
            } else {
                state.layers.len()
            }
        };
        self.add_layer_at(layer, name, index)
    }

    /// Insert a layer at `index` (`0 <= index <= layer_count()`).
    pub fn add_layer_at(
        &self,
        layer: Arc<dyn Configuration>,
        name: Option<&str>,
        index: usize,
    ) -> ConfigResult<()> {
        self.insert_layer(layer, name, index, false)
    }

    fn insert_layer(
        &self,
        layer: Arc<dyn Configuration>,
        name: Option<&str>,
        index: usize,
        as_container: bool,
    ) -> ConfigResult<()> {
        {
            let state = self.inner.state.read();
            if state.position(&layer).is_some() {
                tracing::warn!(name = name.unwrap_or_default(), "layer already present, not added");
                return Ok(());
            }
            if index > state.layers.len() {
                return Err(ConfigError::index_out_of_bounds(index, state.layers.len()));
            }
            state.check_name(name)?;
        }

        self.fire_source_changed(|state| {
            // Re-validate under the write lock; another writer may have raced us.
            if state.position(&layer).is_some() {
                return Ok(false);
            }
            if index > state.layers.len() {
                return Err(ConfigError::index_out_of_bounds(index, state.layers.len()));
            }
            state.check_name(name)?;

            let subscription = self.attach(&layer);
            state.layers.insert(
                index,
                LayerEntry {
                    name: name.map(str::to_owned),
                    layer: Arc::clone(&layer),
                    subscription,
                },
            );
            if as_container {
                state.container = layer;
                state.container_customized = true;
            }
            Ok(true)
        })?;

        tracing::debug!(
            name = name.unwrap_or_default(),
            index,
            as_container,
            "layer added"
        );
        Ok(())
    }

    /// Replace the container with `layer`, inserted at `index`.
    ///
    /// The previous container stays in the list as an ordinary layer. Does
    /// nothing if `layer` is already a member.
    pub fn set_container_layer(
        &self,
        layer: Arc<dyn Configuration>,
        name: Option<&str>,
        index: usize,
    ) -> ConfigResult<()> {
        self.insert_layer(layer, name, index, true)
    }

    /// Move the container layer to `index` (`0 <= index < layer_count()`).
    pub fn set_container_layer_index(&self, index: usize) -> ConfigResult<()> {
        {
            let state = self.inner.state.read();
            if index >= state.layers.len() {
                return Err(ConfigError::index_out_of_bounds(index, state.layers.len()));
            }
        }
        self.fire_source_changed(|state| {
            if index >= state.layers.len() {
                return Err(ConfigError::index_out_of_bounds(index, state.layers.len()));
            }
            let current = state.container_index();
            let entry = state.layers.remove(current);
            state.layers.insert(index, entry);
            state.container_customized = true;
            Ok(current != index)
        })
    }

    /// Remove `layer`. Returns `false` if it was not a member.
    ///
    /// Removing the container layer fails with
    /// [`ConfigError::InvalidOperation`] and leaves the list unchanged.
    pub fn remove_layer(&self, layer: &Arc<dyn Configuration>) -> ConfigResult<bool> {
        let index = {
            let state = self.inner.state.read();
            if state.is_container(layer) {
                return Err(Self::container_removal());
            }
            state.position(layer)
        };
        match index {
            Some(_) => self.remove_where(|state| state.position(layer)).map(|r| r.is_some()),
            None => Ok(false),
        }
    }

    /// Remove the layer registered under `name`.
    pub fn remove_layer_by_name(&self, name: &str) -> ConfigResult<Option<Arc<dyn Configuration>>> {
        self.remove_where(|state| {
            state
                .layers
                .iter()
                .position(|e| e.name.as_deref() == Some(name))
        })
    }

    /// Remove the layer at `index`.
    pub fn remove_layer_at(&self, index: usize) -> ConfigResult<Arc<dyn Configuration>> {
        {
            let state = self.inner.state.read();
            if index >= state.layers.len() {
                return Err(ConfigError::index_out_of_bounds(index, state.layers.len()));
            }
        }
        self.remove_where(|state| (index < state.layers.len()).then_some(index))?
            .ok_or_else(|| ConfigError::index_out_of_bounds(index, self.layer_count()))
    }

    fn remove_where<F>(&self, locate: F) -> ConfigResult<Option<Arc<dyn Configuration>>>
    where
        F: Fn(&LayerState) -> Option<usize>,
    {
        {
            let state = self.inner.state.read();
            match locate(&state) {
                None => return Ok(None),
                Some(index) if state.is_container(&state.layers[index].layer) => {
                    return Err(Self::container_removal());
                }
                Some(_) => {}
            }
        }

        let mut removed = None;
        self.fire_source_changed(|state| {
            let Some(index) = locate(state) else {
                return Ok(false);
            };
            if state.is_container(&state.layers[index].layer) {
                return Err(Self::container_removal());
            }
            let entry = state.layers.remove(index);
            entry.layer.unsubscribe(entry.subscription);
            tracing::debug!(name = entry.name.as_deref().unwrap_or_default(), index, "layer removed");
            removed = Some(entry.layer);
            Ok(true)
        })?;
        Ok(removed)
    }

    fn container_removal() -> ConfigError {
        ConfigError::invalid_operation("the container layer cannot be removed")
    }

    // -----------------------------------------------------------------------
    // Override layer
    // -----------------------------------------------------------------------

    /// Force `key` to `value`, winning over every layer.
    pub fn set_override_property(&self, key: &str, value: Value) -> ConfigResult<()> {
        let override_layer = Arc::clone(&self.inner.state.read().override_layer);
        override_layer.set_property(key, value)
    }

    /// Drop the override for `key`, restoring the layer-resolved value.
    pub fn clear_override_property(&self, key: &str) -> ConfigResult<()> {
        let override_layer = Arc::clone(&self.inner.state.read().override_layer);
        override_layer.clear_property(key)
    }

    /// Current override for `key`, if any.
    pub fn get_override_property(&self, key: &str) -> Option<Value> {
        self.inner.state.read().override_layer.get_property(key)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Layer that currently supplies `key`: the override layer if it holds
    /// the key, else the first member of the list that does.
    pub fn resolve(&self, key: &str) -> Option<Arc<dyn Configuration>> {
        self.inner.resolve(key)
    }

    /// Number of layers in the list (the override layer is not counted).
    pub fn layer_count(&self) -> usize {
        self.inner.state.read().layers.len()
    }

    /// Layer registered under `name`.
    pub fn layer(&self, name: &str) -> Option<Arc<dyn Configuration>> {
        self.inner
            .state
            .read()
            .layers
            .iter()
            .find(|e| e.name.as_deref() == Some(name))
            .map(|e| Arc::clone(&e.layer))
    }

    /// Layer at `index`.
    pub fn layer_at(&self, index: usize) -> Option<Arc<dyn Configuration>> {
        self.inner
            .state
            .read()
            .layers
            .get(index)
            .map(|e| Arc::clone(&e.layer))
    }

    /// Position of the layer registered under `name`.
    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.inner
            .state
            .read()
            .layers
            .iter()
            .position(|e| e.name.as_deref() == Some(name))
    }

    /// Position of `layer` in the list.
    pub fn index_of(&self, layer: &Arc<dyn Configuration>) -> Option<usize> {
        self.inner.state.read().position(layer)
    }

    /// Names of the named layers, in priority order.
    pub fn layer_names(&self) -> Vec<String> {
        self.inner
            .state
            .read()
            .layers
            .iter()
            .filter_map(|e| e.name.clone())
            .collect()
    }

    /// The layer receiving direct writes.
    pub fn container_layer(&self) -> Arc<dyn Configuration> {
        Arc::clone(&self.inner.state.read().container)
    }

    /// Current position of the container layer.
    pub fn container_index(&self) -> usize {
        self.inner.state.read().container_index()
    }

    /// The override layer.
    pub fn override_layer(&self) -> Arc<dyn Configuration> {
        self.inner.state.read().override_layer.clone()
    }

    fn snapshot_layers(&self) -> LayerSnapshot {
        let state = self.inner.state.read();
        let override_layer: Arc<dyn Configuration> = state.override_layer.clone();
        let layers = state.layers.iter().map(|e| Arc::clone(&e.layer)).collect();
        (
            override_layer,
            layers,
            Arc::clone(&state.container),
            state.container_customized,
        )
    }
}

impl Configuration for LayeredConfiguration {
    fn get_property(&self, key: &str) -> Option<Value> {
        self.inner.resolve(key)?.get_property(key)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.inner.resolve(key).is_some()
    }

    fn keys(&self) -> Vec<String> {
        let (override_layer, layers, _, _) = self.snapshot_layers();
        let mut keys: IndexSet<String> = override_layer.keys().into_iter().collect();
        for layer in layers {
            keys.extend(layer.keys());
        }
        keys.into_iter().collect()
    }

    fn add_property(&self, key: &str, value: Value) -> ConfigResult<()> {
        self.container_layer().add_property(key, value)
    }

    fn set_property(&self, key: &str, value: Value) -> ConfigResult<()> {
        self.container_layer().set_property(key, value)
    }

    fn clear_property(&self, key: &str) -> ConfigResult<()> {
        self.container_layer().clear_property(key)
    }

    fn write_target(&self) -> Option<Arc<dyn Configuration>> {
        Some(self.container_layer())
    }

    /// Discard every layer and recreate empty container and override layers.
    ///
    /// Listeners registered directly on the old container or override layer
    /// are lost with them.
    fn clear(&self) -> ConfigResult<()> {
        self.inner
            .listeners
            .fire(&ConfigEvent::before(EventKind::Clear, None, None))?;
        {
            let weak = Arc::downgrade(&self.inner);
            let mut state = self.inner.state.write();
            for entry in state.layers.drain(..) {
                entry.layer.unsubscribe(entry.subscription);
            }
            state
                .override_layer
                .unsubscribe(state.override_subscription);
            *state = Self::fresh_state(&weak, self.inner.options);
        }
        tracing::debug!("layered configuration cleared");
        self.inner
            .listeners
            .fire(&ConfigEvent::after(EventKind::Clear, None, None))
    }

    /// Elements for `key`: override first; otherwise the first layer that
    /// contributes any element; the container only as a last resort unless
    /// its position was customized.
    fn get_list(&self, key: &str) -> Vec<Value> {
        let (override_layer, layers, container, customized) = self.snapshot_layers();
        let container_id = layer_id(&container);

        let mut list = Vec::new();
        if override_layer.contains_key(key) {
            list.extend(override_layer.get_list(key));
        }
        for layer in &layers {
            if !list.is_empty() {
                break;
            }
            if (layer_id(layer) != container_id || customized) && layer.contains_key(key) {
                list.extend(layer.get_list(key));
            }
        }
        if list.is_empty() {
            list.extend(container.get_list(key));
        }
        list
    }

    fn list_delimiter(&self) -> Option<char> {
        self.inner.options.list_delimiter
    }

    fn subscribe(&self, listener: ConfigListener) -> SubscriptionId {
        self.inner.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }
}

impl Default for LayeredConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LayeredConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("LayeredConfiguration")
            .field("layers", &state.layers.len())
            .field("container_index", &state.container_index())
            .field("container_customized", &state.container_customized)
            .field("overrides", &state.override_layer.len())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

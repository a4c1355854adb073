//! Binding between the active configuration and cached properties

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

use super::cache::PropertyType;
use super::cached::CachedProperty;
use super::typed::Property;
use crate::core::value::to_raw_string;
use crate::core::{
    ConfigError, ConfigEvent, ConfigListener, ConfigResult, ConfigResultExt, Configuration,
    EventKind, PropertySupport, SubscriptionId, listener,
};
use crate::layers::LayeredConfiguration;

// ---------------------------------------------------------------------------
// ConfigurationPropertySupport
// ---------------------------------------------------------------------------

/// [`PropertySupport`] over any [`Configuration`].
#[derive(Clone)]
pub struct ConfigurationPropertySupport {
    config: Arc<dyn Configuration>,
}

impl ConfigurationPropertySupport {
    /// Wrap `config`.
    pub fn new(config: Arc<dyn Configuration>) -> Self {
        Self { config }
    }

    /// The wrapped configuration.
    pub fn configuration(&self) -> &Arc<dyn Configuration> {
        &self.config
    }
}

impl PropertySupport for ConfigurationPropertySupport {
    fn get_string(&self, name: &str) -> Option<String> {
        self.config.get_string(name)
    }

    fn subscribe(&self, listener: ConfigListener) -> SubscriptionId {
        self.config.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.config.unsubscribe(id)
    }
}

impl fmt::Debug for ConfigurationPropertySupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationPropertySupport")
            .field("keys", &self.config.keys().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PropertyRegistry
// ---------------------------------------------------------------------------

struct Installation {
    support: Arc<dyn PropertySupport>,
    subscription: SubscriptionId,
    /// A default source may be replaced by a later install.
    replaceable: bool,
}

#[derive(Default)]
struct RegistryInner {
    properties: RwLock<HashMap<String, Arc<CachedProperty>>>,
    installed: RwLock<Option<Installation>>,
    attached: AtomicBool,
    default_configuration: Option<Arc<LayeredConfiguration>>,
}

impl RegistryInner {
    fn support(&self) -> Option<Arc<dyn PropertySupport>> {
        if !self.attached.load(Ordering::Acquire) {
            return None;
        }
        self.installed
            .read()
            .as_ref()
            .map(|installation| Arc::clone(&installation.support))
    }

    fn property(&self, name: &str) -> Option<Arc<CachedProperty>> {
        self.properties.read().get(name).cloned()
    }

    fn refresh(&self, name: &str) {
        if let Some(property) = self.property(name) {
            let raw = self.support().and_then(|s| s.get_string(name));
            property.update(raw);
        }
    }

    fn refresh_all(&self) {
        let properties: Vec<Arc<CachedProperty>> =
            self.properties.read().values().cloned().collect();
        let support = self.support();
        for property in properties {
            let raw = support.as_ref().and_then(|s| s.get_string(property.name()));
            property.update(raw);
        }
    }

    /// Check the current installation and replace it with `support` under
    /// one write guard, then refresh every property.
    ///
    /// Returns `false` when `support` is already installed.
    fn swap<F>(
        self: &Arc<Self>,
        support: Arc<dyn PropertySupport>,
        replaceable: bool,
        check: F,
    ) -> ConfigResult<bool>
    where
        F: FnOnce(Option<&Installation>) -> ConfigResult<()>,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        {
            let mut installed = self.installed.write();
            if installed
                .as_ref()
                .is_some_and(|current| same_support(&current.support, &support))
            {
                return Ok(false);
            }
            check(installed.as_ref())?;

            if let Some(previous) = installed.take() {
                previous.support.unsubscribe(previous.subscription);
            }
            let subscription = support.subscribe(listener(move |event| match weak.upgrade() {
                Some(inner) => inner.on_event(event),
                None => Ok(()),
            }));
            *installed = Some(Installation {
                support,
                subscription,
                replaceable,
            });
            self.attached.store(true, Ordering::Release);
        }
        self.refresh_all();
        Ok(true)
    }

    fn on_event(&self, event: &ConfigEvent) -> ConfigResult<()> {
        if event.before_update {
            return self.validate(event);
        }
        match (event.kind, event.key.as_deref()) {
            (EventKind::AddProperty | EventKind::SetProperty | EventKind::ClearProperty, Some(key)) => {
                self.refresh(key);
            }
            (EventKind::Clear | EventKind::SourceChanged, _) => self.refresh_all(),
            _ => {}
        }
        Ok(())
    }

    fn validate(&self, event: &ConfigEvent) -> ConfigResult<()> {
        if !matches!(event.kind, EventKind::AddProperty | EventKind::SetProperty) {
            return Ok(());
        }
        let Some(key) = event.key.as_deref() else {
            return Ok(());
        };
        let (Some(property), Some(candidate)) = (
            self.property(key),
            event.value.as_ref().and_then(to_raw_string),
        ) else {
            return Ok(());
        };
        property.validate(&candidate)
    }
}

/// Table of [`CachedProperty`] instances bound to one installed source.
///
/// Cloning is cheap and shares the table. Create one per application at the
/// composition root; [`global`](Self::global) exists for small programs.
#[derive(Clone, Default)]
pub struct PropertyRegistry {
    inner: Arc<RegistryInner>,
}

impl PropertyRegistry {
    /// Create a registry with no source installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry backed by a fresh [`LayeredConfiguration`] that a
    /// later [`install`](Self::install) may replace.
    pub fn with_default_configuration() -> Self {
        let config = Arc::new(LayeredConfiguration::new());
        let registry = Self {
            inner: Arc::new(RegistryInner {
                default_configuration: Some(Arc::clone(&config)),
                ..RegistryInner::default()
            }),
        };
        let support = Arc::new(ConfigurationPropertySupport::new(config));
        registry.inner.swap(support, true, |_| Ok(())).log_error();
        registry
    }

    /// Process-wide registry backed by a default configuration.
    pub fn global() -> &'static PropertyRegistry {
        static GLOBAL: OnceLock<PropertyRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_default_configuration)
    }

    /// The configuration created by
    /// [`with_default_configuration`](Self::with_default_configuration).
    ///
    /// It stays available after another source replaces it, but then no
    /// longer feeds the registry's properties.
    pub fn default_configuration(&self) -> Option<Arc<LayeredConfiguration>> {
        self.inner.default_configuration.clone()
    }

    /// Bind `support` as the source of every property.
    ///
    /// Every existing property is refreshed from the new source.
    /// Installing the same source twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidOperation`] if a different, non-default source
    /// is already installed.
    pub fn install(&self, support: Arc<dyn PropertySupport>) -> ConfigResult<()> {
        let installed = self.inner.swap(support, false, |current| match current {
            Some(current) if !current.replaceable => Err(ConfigError::invalid_operation(
                "a configuration source is already installed",
            )),
            _ => Ok(()),
        })?;
        if installed {
            tracing::info!(properties = self.len(), "configuration source installed");
        }
        Ok(())
    }

    /// Install `config` through a [`ConfigurationPropertySupport`].
    pub fn install_configuration(&self, config: Arc<dyn Configuration>) -> ConfigResult<()> {
        self.install(Arc::new(ConfigurationPropertySupport::new(config)))
    }

    /// Detach the installed source and drop every property from the table.
    ///
    /// Handles held elsewhere keep their last value but no longer update.
    pub fn reset(&self) {
        if let Some(previous) = self.inner.installed.write().take() {
            previous.support.unsubscribe(previous.subscription);
        }
        self.inner.attached.store(false, Ordering::Release);
        self.inner.properties.write().clear();
        tracing::info!("property registry reset");
    }

    /// Whether a source is installed.
    pub fn is_installed(&self) -> bool {
        self.inner.attached.load(Ordering::Acquire)
    }

    /// The installed source.
    pub fn support(&self) -> Option<Arc<dyn PropertySupport>> {
        self.inner.support()
    }

    /// Shared property for `name`, created and seeded on first request.
    pub fn get_or_create(&self, name: &str) -> Arc<CachedProperty> {
        if let Some(existing) = self.inner.property(name) {
            return existing;
        }
        let mut properties = self.inner.properties.write();
        Arc::clone(properties.entry(name.to_owned()).or_insert_with(|| {
            let raw = self.inner.support().and_then(|s| s.get_string(name));
            Arc::new(CachedProperty::new(name, raw))
        }))
    }

    /// Existing property for `name`, without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<CachedProperty>> {
        self.inner.property(name)
    }

    /// Number of properties created so far.
    pub fn len(&self) -> usize {
        self.inner.properties.read().len()
    }

    /// Whether no property has been created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed handle for `name` with a fallback value.
    pub fn property<T: PropertyType>(&self, name: &str, default: T) -> Property<T> {
        Property::new(self.get_or_create(name), default)
    }

    /// Boolean property handle.
    pub fn bool_property(&self, name: &str, default: bool) -> Property<bool> {
        self.property(name, default)
    }

    /// 32-bit integer property handle.
    pub fn int_property(&self, name: &str, default: i32) -> Property<i32> {
        self.property(name, default)
    }

    /// 64-bit integer property handle.
    pub fn long_property(&self, name: &str, default: i64) -> Property<i64> {
        self.property(name, default)
    }

    /// 32-bit float property handle.
    pub fn float_property(&self, name: &str, default: f32) -> Property<f32> {
        self.property(name, default)
    }

    /// 64-bit float property handle.
    pub fn double_property(&self, name: &str, default: f64) -> Property<f64> {
        self.property(name, default)
    }

    /// String property handle.
    pub fn string_property(&self, name: &str, default: impl Into<String>) -> Property<String> {
        self.property(name, default.into())
    }
}

fn same_support(a: &Arc<dyn PropertySupport>, b: &Arc<dyn PropertySupport>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

impl fmt::Debug for PropertyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyRegistry")
            .field("properties", &self.len())
            .field("installed", &self.is_installed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ConcurrentMapConfiguration;
    use serde_json::json;

    fn installed() -> (PropertyRegistry, Arc<ConcurrentMapConfiguration>) {
        let registry = PropertyRegistry::new();
        let config = Arc::new(ConcurrentMapConfiguration::new());
        registry.install_configuration(config.clone()).unwrap();
        (registry, config)
    }

    #[test]
    fn same_name_yields_same_instance() {
        let registry = PropertyRegistry::new();
        let a = registry.get_or_create("x");
        let b = registry.get_or_create("x");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn properties_are_seeded_and_refreshed() {
        let (registry, config) = installed();
        config.set_property("a", json!("1")).unwrap();
        let a = registry.get_or_create("a");
        assert_eq!(a.raw().as_deref(), Some("1"));

        config.set_property("a", json!("2")).unwrap();
        assert_eq!(a.raw().as_deref(), Some("2"));

        config.clear_property("a").unwrap();
        assert_eq!(a.raw(), None);
    }

    #[test]
    fn install_refreshes_existing_properties() {
        let registry = PropertyRegistry::new();
        let a = registry.get_or_create("a");
        assert_eq!(a.raw(), None);

        let config = Arc::new(ConcurrentMapConfiguration::new());
        config.set_property("a", json!("seeded")).unwrap();
        registry.install_configuration(config).unwrap();
        assert_eq!(a.raw().as_deref(), Some("seeded"));
    }

    #[test]
    fn second_install_is_rejected_unless_default() {
        let (registry, _config) = installed();
        let other: Arc<dyn Configuration> = Arc::new(ConcurrentMapConfiguration::new());
        let err = registry.install_configuration(other).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOperation { .. }));

        let defaulted = PropertyRegistry::with_default_configuration();
        assert!(defaulted.is_installed());
        defaulted
            .install_configuration(Arc::new(ConcurrentMapConfiguration::new()))
            .unwrap();
    }

    #[test]
    fn racing_installs_admit_exactly_one_source() {
        let registry = PropertyRegistry::with_default_configuration();
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let config: Arc<dyn Configuration> =
                        Arc::new(ConcurrentMapConfiguration::new());
                    barrier.wait();
                    registry.install_configuration(config).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn default_configuration_feeds_properties() {
        let registry = PropertyRegistry::with_default_configuration();
        let timeout = registry.int_property("timeout", 5);
        let config = registry.default_configuration().unwrap();

        config.set_property("timeout", json!("30")).unwrap();
        assert_eq!(timeout.get(), 30);
        assert!(PropertyRegistry::new().default_configuration().is_none());
    }

    #[test]
    fn reinstalling_same_support_is_a_no_op() {
        let registry = PropertyRegistry::new();
        let support: Arc<dyn PropertySupport> = Arc::new(ConfigurationPropertySupport::new(
            Arc::new(ConcurrentMapConfiguration::new()),
        ));
        registry.install(support.clone()).unwrap();
        registry.install(support).unwrap();
    }

    #[test]
    fn clear_all_refreshes_every_property() {
        let (registry, config) = installed();
        config.set_property("a", json!("1")).unwrap();
        config.set_property("b", json!("2")).unwrap();
        let a = registry.get_or_create("a");
        let b = registry.get_or_create("b");

        config.clear().unwrap();
        assert_eq!(a.raw(), None);
        assert_eq!(b.raw(), None);
    }

    #[test]
    fn validators_veto_writes() {
        let (registry, config) = installed();
        let port = registry.get_or_create("port");
        port.add_validator(|raw| match i32::parse_raw(raw) {
            Ok(p) if p > 0 => Ok(()),
            _ => Err(ConfigError::validation_error("invalid port", None)),
        });

        config.set_property("port", json!("8080")).unwrap();
        let err = config.set_property("port", json!("-1")).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(config.get_property("port"), Some(json!("8080")));
        assert_eq!(port.get::<i32>().unwrap(), Some(8080));
    }

    #[test]
    fn reset_detaches_source() {
        let (registry, config) = installed();
        let a = registry.get_or_create("a");
        registry.reset();
        assert!(!registry.is_installed());
        assert!(registry.is_empty());

        config.set_property("a", json!("late")).unwrap();
        assert_eq!(a.raw(), None);
    }
}

//! Strata Config - runtime-mutable layered configuration
//!
//! Values live in an ordered stack of configuration layers, are refreshed
//! from polled or push-based sources while the process runs, and are read
//! through cached, typed property handles that update themselves.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_config::prelude::*;
//!
//! # fn load() -> ConfigResult<()> {
//! let config = Arc::new(LayeredConfiguration::new());
//! let registry = PropertyRegistry::new();
//! registry.install_configuration(config.clone())?;
//!
//! let timeout = registry.int_property("http.timeout_ms", 500);
//! config.set_property("http.timeout_ms", "750".into())?;
//! assert_eq!(timeout.get(), 750);
//!
//! config.set_override_property("http.timeout_ms", "100".into())?;
//! assert_eq!(timeout.get(), 100);
//! # Ok(())
//! # }
//! ```

#![deny(unused_must_use)]
#![warn(missing_docs)]

// Core module with shared types and traits
pub mod core;

// Implementation modules
pub mod layers;
pub mod property;
pub mod reconcile;
pub mod watchers;

// Re-export main types from core
pub use crate::core::{
    ConfigError, ConfigEvent, ConfigListener, ConfigResult, ConfigResultExt, ErrorCategory,
    EventKind, Snapshot, SubscriptionId, Value, listener, veto,
};

// Re-export traits
pub use crate::core::{Configuration, PolledSource, PropertySupport, WatchedSource};

// Re-export concrete implementations
pub use layers::{
    ConcurrentMapConfiguration, LayerOptions, LayeredConfiguration, PolledConfiguration,
    ReadOnlyConfiguration,
};
pub use property::{CachedProperty, ConfigurationPropertySupport, Property, PropertyRegistry};
pub use reconcile::{ApplySummary, UpdateReconciler};
pub use watchers::{
    Checkpoint, PollEvent, PollResult, PollingOptions, PollingScheduler, UpdateResult,
    WatchedConfiguration,
};

/// Prelude module for convenient imports
pub mod prelude {
    //! Prelude for common imports
    //!
    //! # Example
    //! ```rust
    //! use strata_config::prelude::*;
    //! ```

    // Core types
    pub use crate::core::{
        ConfigError, ConfigEvent, ConfigResult, ConfigResultExt, EventKind, Snapshot, Value,
        listener, veto,
    };

    // Traits
    pub use crate::core::{Configuration, PolledSource, PropertySupport, WatchedSource};

    // Implementations
    pub use crate::layers::{ConcurrentMapConfiguration, LayeredConfiguration};
    pub use crate::property::{CachedProperty, Property, PropertyRegistry};
    pub use crate::reconcile::UpdateReconciler;
    pub use crate::watchers::{PollResult, PollingOptions, PollingScheduler, UpdateResult};
}

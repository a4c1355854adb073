//! Cached, auto-updating properties

mod cache;
mod cached;
mod registry;
mod typed;

pub use cache::{PropertyType, TypeHandle, ValueCache};
pub use cached::{CachedProperty, PropertyCallback, PropertyValidator};
pub use registry::{ConfigurationPropertySupport, PropertyRegistry};
pub use typed::Property;

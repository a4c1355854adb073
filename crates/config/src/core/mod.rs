//! Core configuration functionality

pub mod error;
pub mod event;
pub mod result;
pub mod traits;
pub mod value;

// Re-export core types
pub use error::{ConfigError, ErrorCategory};
pub use event::{ConfigEvent, ConfigListener, EventKind, Listeners, SubscriptionId, listener, veto};
pub use result::{ConfigResult, ConfigResultExt};
pub use value::{DEFAULT_LIST_DELIMITER, Snapshot, Value};

// Re-export core traits
pub use traits::{Configuration, PolledSource, PropertySupport, UpdateListener, WatchedSource};
pub(crate) use traits::check_key;

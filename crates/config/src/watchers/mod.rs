//! Source drivers: polling scheduler and push-based layers

mod polling;
mod types;
mod watched;

pub use polling::{PollingOptions, PollingScheduler, next_checkpoint};
pub use types::{Checkpoint, PollEvent, PollResult, UpdateResult};
pub use watched::WatchedConfiguration;

// Re-export source traits from core for convenience
pub use crate::core::{PolledSource, WatchedSource};

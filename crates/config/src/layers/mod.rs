//! Configuration layer implementations

mod concurrent;
mod layered;
mod polled;
mod read_only;

pub use concurrent::{ConcurrentMapConfiguration, LayerOptions, LockPartition};
pub use layered::LayeredConfiguration;
pub use polled::PolledConfiguration;
pub use read_only::ReadOnlyConfiguration;

//! Poll/update results and scheduler events

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{ConfigError, Snapshot, Value};

// ---------------------------------------------------------------------------
// UpdateResult
// ---------------------------------------------------------------------------

/// Content reported by a source: either a whole snapshot or a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateResult {
    /// Every key the source currently holds.
    Full {
        /// Complete key/value mapping.
        complete: Snapshot,
    },
    /// Changes since the previous result.
    Incremental {
        /// Keys that appeared.
        added: Snapshot,
        /// Keys whose value changed.
        changed: Snapshot,
        /// Keys that disappeared; values are ignored.
        deleted: Snapshot,
    },
}

impl UpdateResult {
    /// Create a full result.
    pub fn full(complete: Snapshot) -> Self {
        Self::Full { complete }
    }

    /// Create an incremental result.
    pub fn incremental(added: Snapshot, changed: Snapshot, deleted: Snapshot) -> Self {
        Self::Incremental {
            added,
            changed,
            deleted,
        }
    }

    /// Whether this is a delta rather than a snapshot.
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental { .. })
    }

    /// Whether applying this result could change anything.
    ///
    /// A full result always counts, even when empty: it deletes every key
    /// the target holds.
    pub fn has_changes(&self) -> bool {
        match self {
            Self::Full { .. } => true,
            Self::Incremental {
                added,
                changed,
                deleted,
            } => !added.is_empty() || !changed.is_empty() || !deleted.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint / PollResult
// ---------------------------------------------------------------------------

/// Opaque cursor handed back to a source on its next poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(Value);

impl Checkpoint {
    /// Wrap a token value.
    pub fn new(token: impl Into<Value>) -> Self {
        Self(token.into())
    }

    /// Underlying token.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Token as an integer, when the source uses numeric cursors.
    pub fn as_u64(&self) -> Option<u64> {
        self.0.as_u64()
    }

    /// Token as a string, when the source uses string cursors.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }
}

/// Result of one [`PolledSource::poll`](crate::core::PolledSource::poll) call.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    update: UpdateResult,
    checkpoint: Option<Checkpoint>,
}

impl PollResult {
    /// Full snapshot without a checkpoint.
    pub fn full(complete: Snapshot) -> Self {
        Self {
            update: UpdateResult::full(complete),
            checkpoint: None,
        }
    }

    /// Delta with an optional checkpoint.
    pub fn incremental(
        added: Snapshot,
        changed: Snapshot,
        deleted: Snapshot,
        checkpoint: Option<Checkpoint>,
    ) -> Self {
        Self {
            update: UpdateResult::incremental(added, changed, deleted),
            checkpoint,
        }
    }

    /// Attach a checkpoint.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// The reported content.
    pub fn update(&self) -> &UpdateResult {
        &self.update
    }

    /// Checkpoint for the next poll.
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }
}

impl From<UpdateResult> for PollResult {
    fn from(update: UpdateResult) -> Self {
        Self {
            update,
            checkpoint: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PollEvent
// ---------------------------------------------------------------------------

/// Outcome of one scheduler poll attempt.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// The source answered and the result was applied.
    Success {
        /// Result returned by the source.
        result: Arc<PollResult>,
        /// Whether this was the initial load.
        initial: bool,
        /// When the attempt finished.
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// The source failed; configuration was left untouched.
    Failure {
        /// Error raised by the source.
        error: ConfigError,
        /// Whether this was the initial load.
        initial: bool,
        /// When the attempt finished.
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PollEvent {
    pub(crate) fn success(result: Arc<PollResult>, initial: bool) -> Self {
        Self::Success {
            result,
            initial,
            timestamp: chrono::Utc::now(),
        }
    }

    pub(crate) fn failure(error: ConfigError, initial: bool) -> Self {
        Self::Failure {
            error,
            initial,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Check if this is a success event
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if this event belongs to the initial load
    pub fn is_initial(&self) -> bool {
        match self {
            Self::Success { initial, .. } | Self::Failure { initial, .. } => *initial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_full_result_still_has_changes() {
        assert!(UpdateResult::full(Snapshot::new()).has_changes());
        assert!(
            !UpdateResult::incremental(Snapshot::new(), Snapshot::new(), Snapshot::new())
                .has_changes()
        );
    }

    #[test]
    fn checkpoint_accessors() {
        let cp = Checkpoint::new(42u64);
        assert_eq!(cp.as_u64(), Some(42));
        assert_eq!(Checkpoint::new("cursor-7").as_str(), Some("cursor-7"));

        let mut deleted = Snapshot::new();
        deleted.insert("gone".into(), json!(null));
        let result = PollResult::incremental(Snapshot::new(), Snapshot::new(), deleted, None)
            .with_checkpoint(cp.clone());
        assert_eq!(result.checkpoint(), Some(&cp));
        assert!(result.update().is_incremental());
    }

    #[test]
    fn update_result_serializes_with_tag() {
        let mut complete = Snapshot::new();
        complete.insert("a".into(), json!("1"));
        let encoded = serde_json::to_value(UpdateResult::full(complete)).unwrap();
        assert_eq!(encoded, json!({"type": "full", "complete": {"a": "1"}}));
    }
}

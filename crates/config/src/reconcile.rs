//! Applying source results to a configuration
//!
//! [`UpdateReconciler`] turns an [`UpdateResult`] into the minimal sequence
//! of `add`/`set`/`clear` calls on a target [`Configuration`]. Unchanged
//! keys produce no mutation and therefore no events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::value::normalize;
use crate::core::{ConfigResult, Configuration, Snapshot, Value};
use crate::watchers::UpdateResult;

/// Counts of what one [`UpdateReconciler::apply`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    /// Keys that were absent and got added.
    pub added: usize,
    /// Keys that got a new value, or were cleared by a null value.
    pub changed: usize,
    /// Keys removed because the source no longer reports them.
    pub deleted: usize,
    /// Keys whose value already matched.
    pub unchanged: usize,
    /// Keys whose mutation failed; the error was logged.
    pub failed: usize,
}

impl ApplySummary {
    /// Number of keys actually mutated.
    pub fn mutations(&self) -> usize {
        self.added + self.changed + self.deleted
    }

    /// Whether anything was mutated.
    pub fn has_mutations(&self) -> bool {
        self.mutations() > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Added,
    Changed,
    Deleted,
    Unchanged,
}

/// Stateless applier of source results.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateReconciler;

impl UpdateReconciler {
    /// Apply `result` to `config`.
    ///
    /// - `None`, or a result reporting no changes, is a no-op.
    /// - A full result adds or changes every key it carries, then clears
    ///   every key of `config` it does not mention unless `ignore_deletes`.
    /// - An incremental result applies `added`, then `changed`, then
    ///   `deleted` (the latter skipped when `ignore_deletes`).
    ///
    /// When `config` stores its writes in another layer (see
    /// [`Configuration::write_target`]), that layer is both diffed and
    /// written, so keys owned by other layers of a composite are never
    /// touched.
    ///
    /// A failure on one key is logged and counted, never aborts the rest.
    pub fn apply(
        result: Option<&UpdateResult>,
        config: &dyn Configuration,
        ignore_deletes: bool,
    ) -> ApplySummary {
        let mut summary = ApplySummary::default();
        let Some(result) = result.filter(|r| r.has_changes()) else {
            return summary;
        };
        let target = Self::write_target(config);
        let config: &dyn Configuration = target.as_deref().unwrap_or(config);

        match result {
            UpdateResult::Full { complete } => {
                Self::upsert_all(complete, config, &mut summary);
                if !ignore_deletes {
                    let stale: Vec<String> = config
                        .keys()
                        .into_iter()
                        .filter(|key| !complete.contains_key(key))
                        .collect();
                    for key in stale {
                        Self::record(&key, Self::delete(&key, config), &mut summary);
                    }
                }
            }
            UpdateResult::Incremental {
                added,
                changed,
                deleted,
            } => {
                Self::upsert_all(added, config, &mut summary);
                Self::upsert_all(changed, config, &mut summary);
                if !ignore_deletes {
                    for key in deleted.keys() {
                        Self::record(key, Self::delete(key, config), &mut summary);
                    }
                }
            }
        }

        tracing::debug!(
            added = summary.added,
            changed = summary.changed,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            failed = summary.failed,
            incremental = result.is_incremental(),
            "update applied"
        );
        summary
    }

    fn write_target(config: &dyn Configuration) -> Option<Arc<dyn Configuration>> {
        let mut target = config.write_target()?;
        while let Some(next) = target.write_target() {
            target = next;
        }
        Some(target)
    }

    fn upsert_all(entries: &Snapshot, config: &dyn Configuration, summary: &mut ApplySummary) {
        for (key, value) in entries {
            Self::record(key, Self::add_or_change(key, value, config), summary);
        }
    }

    fn record(key: &str, outcome: ConfigResult<Outcome>, summary: &mut ApplySummary) {
        match outcome {
            Ok(Outcome::Added) => summary.added += 1,
            Ok(Outcome::Changed) => summary.changed += 1,
            Ok(Outcome::Deleted) => summary.deleted += 1,
            Ok(Outcome::Unchanged) => summary.unchanged += 1,
            Err(error) => {
                summary.failed += 1;
                tracing::warn!(key, %error, "failed to apply property update");
            }
        }
    }

    fn add_or_change(key: &str, new: &Value, config: &dyn Configuration) -> ConfigResult<Outcome> {
        let Some(old) = config.get_property(key) else {
            if new.is_null() {
                return Ok(Outcome::Unchanged);
            }
            config.add_property(key, new.clone())?;
            tracing::debug!(key, "property added");
            return Ok(Outcome::Added);
        };

        if new.is_null() {
            config.clear_property(key)?;
            tracing::debug!(key, "property cleared by null update");
            return Ok(Outcome::Changed);
        }

        // Compare in stored form so "a,b" and ["a", "b"] count as equal.
        let incoming = normalize(new.clone(), config.list_delimiter());
        if incoming == old {
            return Ok(Outcome::Unchanged);
        }
        config.set_property(key, new.clone())?;
        tracing::debug!(key, "property changed");
        Ok(Outcome::Changed)
    }

    fn delete(key: &str, config: &dyn Configuration) -> ConfigResult<Outcome> {
        if !config.contains_key(key) {
            return Ok(Outcome::Unchanged);
        }
        config.clear_property(key)?;
        tracing::debug!(key, "property deleted");
        Ok(Outcome::Deleted)
    }
}

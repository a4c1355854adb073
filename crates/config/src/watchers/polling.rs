//! Periodic polling of a source into a configuration

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::types::{Checkpoint, PollEvent, PollResult};
use crate::core::{ConfigError, ConfigResult, ConfigResultExt, Configuration, PolledSource};
use crate::reconcile::UpdateReconciler;

/// Capacity of the poll event channel; slow receivers see `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// Scheduling options for a [`PollingScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingOptions {
    /// Wait before the first scheduled poll, in milliseconds.
    pub initial_delay_ms: u64,
    /// Wait between scheduled polls, in milliseconds.
    pub delay_ms: u64,
    /// Keep keys the source stops reporting.
    pub ignore_deletes: bool,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            initial_delay_ms: 30_000,
            delay_ms: 60_000,
            ignore_deletes: false,
        }
    }
}

impl PollingOptions {
    /// Set the delay before the first scheduled poll
    #[must_use = "builder methods must be chained or built"]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = duration_ms(delay);
        self
    }

    /// Set the delay between scheduled polls
    #[must_use = "builder methods must be chained or built"]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = duration_ms(delay);
        self
    }

    /// Keep or drop keys the source no longer reports
    #[must_use = "builder methods must be chained or built"]
    pub fn with_ignore_deletes(mut self, ignore: bool) -> Self {
        self.ignore_deletes = ignore;
        self
    }

    /// Delay before the first scheduled poll.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Delay between scheduled polls; never zero.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.max(1))
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// State shared between the scheduler handle and its background task.
struct Shared {
    checkpoint: Mutex<Option<Checkpoint>>,
    active: AtomicBool,
    events: broadcast::Sender<PollEvent>,
}

impl Shared {
    /// Record one poll attempt: update the checkpoint, apply, report.
    fn complete(
        &self,
        outcome: ConfigResult<PollResult>,
        config: &dyn Configuration,
        initial: bool,
        ignore_deletes: bool,
    ) -> ConfigResult<()> {
        match outcome {
            Ok(result) => {
                *self.checkpoint.lock() = result.checkpoint().cloned();
                let summary = UpdateReconciler::apply(Some(result.update()), config, ignore_deletes);
                if summary.has_mutations() {
                    tracing::debug!(
                        initial,
                        mutations = summary.mutations(),
                        failed = summary.failed,
                        "poll result applied"
                    );
                }
                // No receivers is fine.
                let _ = self.events.send(PollEvent::success(Arc::new(result), initial));
                Ok(())
            }
            Err(error) => {
                let _ = self.events.send(PollEvent::failure(error.clone(), initial));
                Err(error)
            }
        }
    }
}

/// Checkpoint to hand to the next poll, given the one stored by the last
/// successful poll.
///
/// Returned unchanged: a source advances or resets its cursor through the
/// checkpoint it puts on its own [`PollResult`]. The scheduler never
/// synthesizes one.
pub fn next_checkpoint(previous: Option<Checkpoint>) -> Option<Checkpoint> {
    previous
}

/// Drives a [`PolledSource`] into a [`Configuration`] on a timer.
///
/// The initial load runs synchronously inside
/// [`start_polling`](Self::start_polling); later polls run on a background
/// tokio task, each on the blocking pool.
pub struct PollingScheduler {
    options: PollingOptions,
    shared: Arc<Shared>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl PollingScheduler {
    /// Create an idle scheduler.
    pub fn new(options: PollingOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            options,
            shared: Arc::new(Shared {
                checkpoint: Mutex::new(None),
                active: AtomicBool::new(false),
                events,
            }),
            cancel: Mutex::new(None),
        }
    }

    /// Scheduling options.
    pub fn options(&self) -> &PollingOptions {
        &self.options
    }

    /// Whether a periodic task is armed.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Checkpoint that will be passed to the next poll.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.shared.checkpoint.lock().clone()
    }

    /// Receive a [`PollEvent`] after every poll attempt.
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.shared.events.subscribe()
    }

    /// Load `source` into `config`, then keep polling it.
    ///
    /// The initial poll and its reconciliation complete before this returns;
    /// a failure there is returned and nothing is scheduled. Must be called
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidOperation`] if already polling or no runtime
    ///   is available.
    /// - The source's error if the initial poll fails.
    pub fn start_polling(
        &self,
        source: Arc<dyn PolledSource>,
        config: Arc<dyn Configuration>,
    ) -> ConfigResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ConfigError::invalid_operation(format!("polling requires a tokio runtime: {e}"))
        })?;

        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConfigError::invalid_operation(
                "polling scheduler is already active",
            ));
        }

        let name = source.name();
        let initial = source.poll(true, None);
        if let Err(error) = self
            .shared
            .complete(initial, config.as_ref(), true, self.options.ignore_deletes)
            .with_context(|| format!("initial poll of '{name}' failed"))
        {
            self.shared.active.store(false, Ordering::Release);
            return Err(error);
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());
        runtime.spawn(poll_loop(
            Arc::clone(&self.shared),
            source,
            config,
            self.options,
            token,
        ));

        tracing::info!(
            source = %name,
            initial_delay_ms = self.options.initial_delay_ms,
            delay_ms = self.options.delay_ms,
            "polling started"
        );
        Ok(())
    }

    /// Cancel future polls. Idempotent; an in-flight poll is not awaited.
    pub fn stop_polling(&self) {
        let token = self.cancel.lock().take();
        if let Some(token) = token {
            token.cancel();
            self.shared.active.store(false, Ordering::Release);
            tracing::info!("polling stopped");
        }
    }
}

impl Default for PollingScheduler {
    fn default() -> Self {
        Self::new(PollingOptions::default())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.get_mut().take() {
            token.cancel();
        }
    }
}

impl fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("options", &self.options)
            .field("active", &self.is_active())
            .field("checkpoint", &self.checkpoint())
            .finish()
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    source: Arc<dyn PolledSource>,
    config: Arc<dyn Configuration>,
    options: PollingOptions,
    token: CancellationToken,
) {
    tokio::select! {
        () = token.cancelled() => return,
        () = tokio::time::sleep(options.initial_delay()) => {}
    }

    let mut ticker = tokio::time::interval(options.delay());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let name = source.name();

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let checkpoint = next_checkpoint(shared.checkpoint.lock().clone());
        let polled = Arc::clone(&source);
        let outcome =
            match tokio::task::spawn_blocking(move || polled.poll(false, checkpoint.as_ref())).await
            {
                Ok(outcome) => outcome,
                Err(join) => Err(ConfigError::source_error(
                    "poll task did not complete",
                    join.to_string(),
                )),
            };

        if token.is_cancelled() {
            break;
        }
        // Failures are isolated to this cycle.
        shared
            .complete(outcome, config.as_ref(), false, options.ignore_deletes)
            .with_context(|| format!("scheduled poll of '{name}' failed"))
            .log_error();
    }

    tracing::debug!(source = %name, "poll loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Snapshot;
    use crate::layers::ConcurrentMapConfiguration;
    use serde_json::json;

    struct Fixed(Snapshot);

    impl PolledSource for Fixed {
        fn poll(&self, _initial: bool, _checkpoint: Option<&Checkpoint>) -> ConfigResult<PollResult> {
            Ok(PollResult::full(self.0.clone()))
        }
    }

    struct Broken;

    impl PolledSource for Broken {
        fn poll(&self, _initial: bool, _checkpoint: Option<&Checkpoint>) -> ConfigResult<PollResult> {
            Err(ConfigError::source_error("unreachable", "test"))
        }
    }

    #[test]
    fn options_defaults_and_serde() {
        let options = PollingOptions::default();
        assert_eq!(options.initial_delay(), Duration::from_secs(30));
        assert_eq!(options.delay(), Duration::from_secs(60));

        let parsed: PollingOptions = serde_json::from_value(json!({"delay_ms": 250})).unwrap();
        assert_eq!(parsed.delay(), Duration::from_millis(250));
        assert_eq!(parsed.initial_delay_ms, 30_000);
    }

    #[test]
    fn next_checkpoint_passes_stored_value_through() {
        let stored = Some(Checkpoint::new(3u64));
        assert_eq!(next_checkpoint(stored.clone()), stored);
        assert_eq!(next_checkpoint(None), None);
    }

    #[test]
    fn successful_poll_replaces_stored_checkpoint() {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Shared {
            checkpoint: Mutex::new(Some(Checkpoint::new(5u64))),
            active: AtomicBool::new(false),
            events,
        };
        let config = ConcurrentMapConfiguration::new();

        let advanced = PollResult::full(Snapshot::new()).with_checkpoint(Checkpoint::new(6u64));
        shared.complete(Ok(advanced), &config, false, false).unwrap();
        assert_eq!(*shared.checkpoint.lock(), Some(Checkpoint::new(6u64)));

        // a result without a checkpoint resets the cursor
        shared
            .complete(Ok(PollResult::full(Snapshot::new())), &config, false, false)
            .unwrap();
        assert_eq!(*shared.checkpoint.lock(), None);

        shared.checkpoint.lock().replace(Checkpoint::new(7u64));
        let failed = shared.complete(
            Err(ConfigError::source_error("down", "test")),
            &config,
            false,
            false,
        );
        assert!(failed.is_err());
        assert_eq!(*shared.checkpoint.lock(), Some(Checkpoint::new(7u64)));
    }

    #[test]
    fn start_without_runtime_is_rejected() {
        let scheduler = PollingScheduler::default();
        let err = scheduler
            .start_polling(
                Arc::new(Fixed(Snapshot::new())),
                Arc::new(ConcurrentMapConfiguration::new()),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOperation { .. }));
        assert!(!scheduler.is_active());
    }

    #[tokio::test]
    async fn initial_failure_propagates_and_leaves_idle() {
        let scheduler = PollingScheduler::default();
        let mut events = scheduler.subscribe();
        let err = scheduler
            .start_polling(Arc::new(Broken), Arc::new(ConcurrentMapConfiguration::new()))
            .unwrap_err();
        assert!(err.to_string().contains("unreachable") || err.to_string().contains("initial"));
        assert!(!scheduler.is_active());

        let event = events.recv().await.unwrap();
        assert!(!event.is_success());
        assert!(event.is_initial());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let scheduler = PollingScheduler::default();
        let config = Arc::new(ConcurrentMapConfiguration::new());
        let mut snapshot = Snapshot::new();
        snapshot.insert("a".into(), json!("1"));

        scheduler
            .start_polling(Arc::new(Fixed(snapshot.clone())), config.clone())
            .unwrap();
        assert_eq!(config.get_property("a"), Some(json!("1")));

        let err = scheduler
            .start_polling(Arc::new(Fixed(snapshot)), config)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOperation { .. }));

        scheduler.stop_polling();
        scheduler.stop_polling();
        assert!(!scheduler.is_active());
    }
}

//! Synchronization engine
//!
//! The SyncEngine is responsible for:
//! - Fetching the configured threat levels via FeedSource
//! - Diffing the result against the stored snapshot
//! - Persisting the new snapshot via SnapshotStore
//! - Pushing address lists and the blocking rule via FirewallClient
//!
//! ## Architecture
//!
//! ```text
//!   ticker / retry / force
//!            │
//!            ▼
//!   ┌─────────────────┐  try_lock   ┌──────────────┐
//!   │   Scheduler     │───────────▶│  run_cycle   │── SyncEvent ──▶ host
//!   └─────────────────┘             └──────────────┘
//!                                          │
//!        ┌────────────────┬────────────────┼────────────────┐
//!        ▼                ▼                ▼                ▼
//!   FeedSource      SnapshotStore    FirewallClient      LogSink
//!   (fetch)         (load, save)     (lists, rule)       (append)
//! ```
//!
//! ## Cycle
//!
//! 1. Guard: skip when the last success is younger than the interval
//! 2. Probe the firewall (optional)
//! 3. Fetch primary and additional levels (retried as one phase)
//! 4. Refuse to replace a non-empty snapshot with an empty fetch
//! 5. Diff against the stored snapshot
//! 6. Persist, then push every batch, then the rule (push retried as one phase)
//!
//! Any unrecovered failure schedules a one-shot retry that leaves the
//! regular interval untouched.

mod scheduler;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::{Mutex, MutexGuard, Notify, RwLock, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};

use crate::config::GuardConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::model::{AddressSet, CycleOutcome, RemoteBatch, SyncCycleResult};
use crate::traits::{FeedSource, FirewallClient, LogSink, SnapshotStore};

/// Tolerance applied to the interval guard
///
/// A timer tick can land a little before a full interval has elapsed since
/// the previous cycle started.
pub const GUARD_SLACK: Duration = Duration::from_secs(5);

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Scheduler started
    Started { interval: Duration },

    /// A cycle acquired the single-flight lock
    CycleStarted { started_at: DateTime<Utc> },

    /// A cycle was dropped because another one was running
    CycleSkipped,

    /// A cycle ended
    CycleFinished(SyncCycleResult),

    /// A one-shot retry was scheduled after a failed cycle
    RetryScheduled { delay: Duration },

    /// New configuration changed the ticker period
    IntervalChanged { interval: Duration },

    /// Scheduler stopped
    Stopped { reason: String },
}

/// Threat feed to firewall synchronization engine
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`]
/// 2. Wrap in an `Arc` and start with [`SyncEngine::run()`]
/// 3. Call [`SyncEngine::stop()`] (or cancel the token) to shut down
///
/// [`SyncEngine::run_cycle()`] and [`SyncEngine::force_cycle()`] can be
/// called at any time, with or without the scheduler. Cycles never overlap:
/// a cycle that finds another one running returns
/// [`CycleOutcome::Skipped`] immediately.
pub struct SyncEngine {
    feed: Arc<dyn FeedSource>,
    firewall: Arc<dyn FirewallClient>,
    store: Arc<dyn SnapshotStore>,
    sink: Arc<dyn LogSink>,

    /// Latest configuration, cloned at the start of every cycle
    config_rx: watch::Receiver<GuardConfig>,

    /// Single-flight guard, only ever taken with `try_lock`
    cycle_lock: Mutex<()>,

    /// Start of the last cycle that succeeded or found nothing to change
    last_success: RwLock<Option<Instant>>,

    /// Pending one-shot retry
    retry_at: RwLock<Option<Instant>>,
    retry_notify: Notify,

    event_tx: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// The current value of `config_rx` is validated; later values are
    /// used as published.
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        feed: Arc<dyn FeedSource>,
        firewall: Arc<dyn FirewallClient>,
        store: Arc<dyn SnapshotStore>,
        sink: Arc<dyn LogSink>,
        config_rx: watch::Receiver<GuardConfig>,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        let capacity = {
            let config = config_rx.borrow();
            config.validate()?;
            config.engine.event_channel_capacity.max(1)
        };

        let (tx, rx) = mpsc::channel(capacity);

        let engine = Self {
            feed,
            firewall,
            store,
            sink,
            config_rx,
            cycle_lock: Mutex::new(()),
            last_success: RwLock::new(None),
            retry_at: RwLock::new(None),
            retry_notify: Notify::new(),
            event_tx: tx,
            cancel: CancellationToken::new(),
        };

        Ok((engine, rx))
    }

    /// Token observed by the scheduler and by in-flight cycles
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a cooperative stop
    ///
    /// The scheduler stops ticking and an in-flight cycle aborts at its next
    /// network call. A snapshot write that already started runs to completion.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Time elapsed since the start of the last successful cycle
    pub async fn time_since_last_success(&self) -> Option<Duration> {
        self.last_success.read().await.map(|at| at.elapsed())
    }

    /// Clear the interval guard and run a cycle now
    ///
    /// Still single-flight: returns `Skipped` without touching the guard if
    /// a cycle is running.
    pub async fn force_cycle(&self) -> SyncCycleResult {
        let started_at = Utc::now();
        self.note(Level::INFO, "Forced update requested");

        let Ok(running) = self.cycle_lock.try_lock() else {
            return self.skip(started_at);
        };

        *self.last_success.write().await = None;
        self.run_locked(running, started_at).await
    }

    /// Run one synchronization cycle
    pub async fn run_cycle(&self) -> SyncCycleResult {
        let started_at = Utc::now();

        let Ok(running) = self.cycle_lock.try_lock() else {
            return self.skip(started_at);
        };

        self.run_locked(running, started_at).await
    }

    fn skip(&self, started_at: DateTime<Utc>) -> SyncCycleResult {
        self.note(Level::INFO, "Update already in progress, skipping");
        self.emit_event(SyncEvent::CycleSkipped);
        SyncCycleResult::skipped(started_at)
    }

    /// Cycle body, holding the single-flight guard until it returns
    async fn run_locked(
        &self,
        _running: MutexGuard<'_, ()>,
        started_at: DateTime<Utc>,
    ) -> SyncCycleResult {
        let started = Instant::now();
        let config = self.config_rx.borrow().clone();
        self.emit_event(SyncEvent::CycleStarted { started_at });
        debug!("Cycle started at {}", started_at);

        let result = match self.execute(&config, started_at, started).await {
            Ok(result) => result,
            Err(e) => {
                self.report_failure(&e);
                SyncCycleResult::failed(started_at, &e)
            }
        };

        if result.outcome == CycleOutcome::Failed
            && result.error_kind() != Some(ErrorKind::Cancelled)
            && !self.cancel.is_cancelled()
        {
            self.schedule_retry(config.engine.failure_retry_delay()).await;
        }

        self.emit_event(SyncEvent::CycleFinished(result.clone()));
        result
    }

    async fn execute(
        &self,
        config: &GuardConfig,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Result<SyncCycleResult> {
        if let Some(last) = *self.last_success.read().await {
            let elapsed = started.saturating_duration_since(last);
            if elapsed + GUARD_SLACK < config.update_interval() {
                self.note(
                    Level::INFO,
                    format!(
                        "Skipping update - last update was {:.1} minutes ago",
                        elapsed.as_secs_f64() / 60.0
                    ),
                );
                return Ok(SyncCycleResult::no_change(started_at));
            }
        }

        self.note(Level::INFO, "Starting update cycle");

        if config.engine.verify_connection {
            self.note(
                Level::INFO,
                format!("Testing connection to firewall at {}", config.device.host),
            );
            self.cancellable(self.firewall.verify_connection(&config.device))
                .await?;
        }

        let policy = config.engine.retry_policy();

        let fetched = policy
            .run("fetch", &self.cancel, move |attempt| {
                self.fetch_all(config, attempt)
            })
            .await?;

        let previous = self.store.load().await;

        if fetched.is_empty() {
            if previous.addresses.is_empty() {
                self.note(Level::WARN, "No IPs found in threat list");
                return Ok(SyncCycleResult::no_change(started_at));
            }
            return Err(Error::FeedEmpty {
                previous: previous.count,
            });
        }

        let added = fetched.difference(&previous.addresses);
        let removed = previous.addresses.difference(&fetched);

        if added.is_empty() && removed.is_empty() {
            self.note(
                Level::INFO,
                format!("No changes in IP list ({} addresses)", fetched.len()),
            );
            *self.last_success.write().await = Some(started);
            return Ok(SyncCycleResult::no_change(started_at));
        }

        self.note(
            Level::INFO,
            format!(
                "Changes detected: {} new IPs, {} removed IPs",
                added.len(),
                removed.len()
            ),
        );

        self.store.save(&fetched).await?;
        debug!("Snapshot saved: {} addresses", fetched.len());

        let batches = RemoteBatch::split(
            &fetched,
            &config.rule.list_prefix,
            config.rule.batch_size,
        );
        let batches = &batches;

        policy
            .run("push", &self.cancel, move |attempt| {
                self.push_all(config, batches, attempt)
            })
            .await?;

        *self.last_success.write().await = Some(started);
        self.note(
            Level::INFO,
            format!("Update completed successfully. Total IPs: {}", fetched.len()),
        );

        Ok(SyncCycleResult {
            added,
            removed,
            ..SyncCycleResult::with_outcome(started_at, CycleOutcome::Success)
        })
    }

    /// Fetch the primary level and union every additional level into it
    ///
    /// Only a primary failure fails the phase. Additional levels that are
    /// invalid or unreachable are logged and skipped.
    async fn fetch_all(&self, config: &GuardConfig, attempt: u32) -> Result<AddressSet> {
        let max_attempts = config.engine.max_attempts;
        let primary = config.primary_level()?;

        self.note(
            Level::INFO,
            format!(
                "Fetching primary IP threat list level {} (Attempt {}/{})",
                primary, attempt, max_attempts
            ),
        );
        let mut set = self.cancellable(self.feed.fetch(primary)).await?;
        self.note(
            Level::INFO,
            format!("Retrieved {} IPs from primary list level {}", set.len(), primary),
        );

        for level in config.additional_levels() {
            let level = match level {
                Ok(level) => level,
                Err(e) => {
                    self.note(Level::WARN, format!("Skipping additional threat list: {}", e));
                    continue;
                }
            };

            self.note(
                Level::INFO,
                format!("Fetching additional IP threat list level {}", level),
            );
            match self.cancellable(self.feed.fetch(level)).await {
                Ok(extra) => {
                    let fetched = extra.len();
                    let new = set.absorb(extra);
                    self.note(
                        Level::INFO,
                        format!(
                            "Retrieved {} IPs from level {}, {} not already listed",
                            fetched, level, new
                        ),
                    );
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => self.note(
                    Level::WARN,
                    format!("Error fetching additional list level {}: {}", level, e),
                ),
            }
        }

        self.note(
            Level::INFO,
            format!("Total unique IPs after combining lists: {}", set.len()),
        );
        Ok(set)
    }

    /// Push every batch, then the rule that references them
    async fn push_all(
        &self,
        config: &GuardConfig,
        batches: &[RemoteBatch],
        attempt: u32,
    ) -> Result<()> {
        self.note(
            Level::INFO,
            format!(
                "Updating firewall with {} address lists via {} (Attempt {}/{})",
                batches.len(),
                self.firewall.client_name(),
                attempt,
                config.engine.max_attempts
            ),
        );

        for batch in batches {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.cancellable(self.firewall.push_address_list(&config.device, batch))
                .await?;
            self.note(
                Level::INFO,
                format!("Updated IP list {} with {} addresses", batch.name, batch.addresses.len()),
            );
        }

        self.cancellable(
            self.firewall
                .push_rule(&config.device, &config.rule, batches.len()),
        )
        .await?;
        self.note(
            Level::INFO,
            format!("Updated firewall rule {}", config.rule.rule_name),
        );

        Ok(())
    }

    /// Race `fut` against the stop signal
    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }

    fn report_failure(&self, err: &Error) {
        let message = match err.kind() {
            ErrorKind::RemoteAuthFailure => {
                format!("Firewall rejected the credentials: {}", err)
            }
            ErrorKind::FeedEmpty => format!("Refusing to apply an empty list: {}", err),
            ErrorKind::Cancelled => {
                self.note(Level::INFO, "Update cycle aborted: engine is stopping");
                return;
            }
            _ => format!("Error in update cycle: {}", err),
        };
        self.note(Level::ERROR, message);
    }

    async fn schedule_retry(&self, delay: Duration) {
        *self.retry_at.write().await = Some(Instant::now() + delay);
        self.retry_notify.notify_one();
        self.note(
            Level::INFO,
            format!("Scheduling retry in {} minutes", delay.as_secs() / 60),
        );
        self.emit_event(SyncEvent::RetryScheduled { delay });
    }

    /// Log through `tracing` and append a timestamped line to the sink
    fn note(&self, level: Level, message: impl AsRef<str>) {
        let message = message.as_ref();
        if level == Level::ERROR {
            error!("{}", message);
        } else if level == Level::WARN {
            warn!("{}", message);
        } else if level == Level::INFO {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
        self.sink.append(&format!(
            "{}: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        ));
    }

    /// Emit an engine event
    fn emit_event(&self, event: SyncEvent) {
        // Full channel: the host is not draining events, drop rather than block
        if self.event_tx.try_send(event).is_err() {
            warn!(
                "Event channel full, dropping event. \
                Consider increasing event_channel_capacity."
            );
        }
    }
}

//! Periodic scheduler
//!
//! One loop owns every trigger source: the interval ticker, the one-shot
//! failure retry, configuration changes and the stop signal. Each trigger
//! spawns [`SyncEngine::run_cycle`] into a `JoinSet`; the cycle's own
//! `try_lock` turns overlapping triggers into `Skipped` results.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{Level, debug, error};

use super::{SyncEngine, SyncEvent};
use crate::error::Result;

/// Shortest ticker period accepted, `interval` panics on zero
const MIN_PERIOD: Duration = Duration::from_secs(1);

fn ticker(start: Instant, period: Duration) -> IntervalStream {
    let mut interval = tokio::time::interval_at(start, period.max(MIN_PERIOD));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    IntervalStream::new(interval)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn minutes(period: Duration) -> u64 {
    period.as_secs() / 60
}

impl SyncEngine {
    /// Run the scheduler until [`SyncEngine::stop`] is called
    ///
    /// Fires one cycle immediately, then one per configured interval. A
    /// failed cycle arms a one-shot retry next to the ticker. Publishing a
    /// configuration with a different interval re-arms the ticker to fire
    /// one full new interval from now.
    ///
    /// On stop, waits for the in-flight cycle to finish or abort before
    /// returning.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut config_rx = self.config_rx.clone();
        let mut config_open = true;
        let mut period = config_rx.borrow_and_update().update_interval();
        let mut ticks = ticker(Instant::now(), period);
        let mut cycles = JoinSet::new();

        self.note(Level::INFO, "Worker service starting");
        self.note(
            Level::INFO,
            format!("Update timer configured for {} minute intervals", minutes(period)),
        );
        self.emit_event(SyncEvent::Started { interval: period });

        loop {
            let retry_at = *self.retry_at.read().await;

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(_) = ticks.next() => {
                    debug!("Timer tick");
                    Self::spawn_cycle(&self, &mut cycles);
                }

                _ = sleep_until(retry_at) => {
                    *self.retry_at.write().await = None;
                    self.note(Level::INFO, "Retrying after failed update");
                    Self::spawn_cycle(&self, &mut cycles);
                }

                // A cycle armed or replaced the retry deadline
                _ = self.retry_notify.notified() => {}

                changed = config_rx.changed(), if config_open => {
                    if changed.is_err() {
                        debug!("Configuration channel closed, keeping last configuration");
                        config_open = false;
                        continue;
                    }
                    let new_period = config_rx.borrow_and_update().update_interval();
                    if new_period != period {
                        period = new_period;
                        ticks = ticker(Instant::now() + period, period);
                        self.note(
                            Level::INFO,
                            format!("Timer interval updated to {} minutes", minutes(period)),
                        );
                        self.emit_event(SyncEvent::IntervalChanged { interval: period });
                    }
                }

                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!("Update cycle task failed: {}", e);
                    }
                }
            }
        }

        self.note(Level::INFO, "Worker service stopping");
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!("Update cycle task failed during shutdown: {}", e);
            }
        }

        self.note(Level::INFO, "Worker service stopped");
        self.emit_event(SyncEvent::Stopped {
            reason: "Shutdown requested".to_string(),
        });
        Ok(())
    }

    fn spawn_cycle(engine: &Arc<Self>, cycles: &mut JoinSet<()>) {
        let engine = Arc::clone(engine);
        cycles.spawn(async move {
            engine.run_cycle().await;
        });
    }
}

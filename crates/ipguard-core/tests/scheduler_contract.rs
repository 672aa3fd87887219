//! Contract Test: Scheduler and Shutdown
//!
//! Constraints verified:
//! - One cycle fires at start, then one per interval
//! - A failed cycle arms a one-shot retry without moving the interval
//! - Publishing a new interval re-arms the ticker without a restart
//! - Stop halts the ticker, aborts an in-flight cycle and returns cleanly

mod common;

use common::*;
use ipguard_core::{MemorySnapshotStore, SyncEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn harness(feed: Arc<MockFeed>) -> Harness {
    Harness::new(
        feed,
        RecordingFirewall::new(),
        Arc::new(MemorySnapshotStore::default()),
        test_config(),
    )
}

#[tokio::test(start_paused = true)]
async fn fires_at_start_then_every_interval() {
    let feed = MockFeed::serving(50, set_of(5));
    let h = harness(feed.clone());

    let handle = tokio::spawn(Arc::clone(&h.engine).run());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(feed.fetch_count(), 1, "initial cycle");

    sleep(Duration::from_secs(30 * 60)).await;
    assert_eq!(feed.fetch_count(), 1, "nothing between ticks");

    sleep(Duration::from_secs(30 * 60)).await;
    assert_eq!(feed.fetch_count(), 2, "second tick after one interval");

    h.engine.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_cycle_retries_once_after_short_delay() {
    let feed = MockFeed::serving(50, set_of(5));
    feed.fail_next(3);
    let h = harness(feed.clone());

    let handle = tokio::spawn(Arc::clone(&h.engine).run());

    // Attempts at 0s, 30s, 60s
    sleep(Duration::from_secs(100)).await;
    assert_eq!(feed.fetch_count(), 3);
    assert!(h.engine.time_since_last_success().await.is_none());

    // One-shot retry five minutes after the failure
    sleep(Duration::from_secs(300)).await;
    assert_eq!(feed.fetch_count(), 4);
    assert!(h.engine.time_since_last_success().await.is_some());

    // The tick at 60 minutes is still due, but the retry succeeded less
    // than an interval before it
    sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(feed.fetch_count(), 4);

    // The tick at 120 minutes fetches again
    sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(feed.fetch_count(), 5);

    h.engine.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn new_interval_rearms_ticker() {
    let feed = MockFeed::serving(50, set_of(5));
    let mut h = harness(feed.clone());

    let handle = tokio::spawn(Arc::clone(&h.engine).run());
    sleep(Duration::from_secs(10)).await;
    assert_eq!(feed.fetch_count(), 1);

    let mut config = test_config();
    config.update_interval_minutes = 1;
    h.config_tx.send(config).unwrap();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(feed.fetch_count(), 1, "re-armed a full interval from the change");

    sleep(Duration::from_secs(40)).await;
    assert_eq!(feed.fetch_count(), 2);

    h.engine.stop();
    handle.await.unwrap().unwrap();

    let events = h.drain_events();
    assert!(events.contains(&SyncEvent::IntervalChanged {
        interval: Duration::from_secs(60)
    }));
}

#[tokio::test(start_paused = true)]
async fn stop_aborts_in_flight_cycle() {
    let feed = MockFeed::serving(50, set_of(5));
    // Never released: the cycle hangs inside the fetch
    let _gate = feed.install_gate();
    let mut h = harness(feed.clone());

    let handle = tokio::spawn(Arc::clone(&h.engine).run());
    sleep(Duration::from_secs(1)).await;
    assert_eq!(feed.fetch_count(), 1);

    h.engine.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stops promptly")
        .unwrap()
        .unwrap();

    let events = h.drain_events();
    assert!(matches!(events.first(), Some(SyncEvent::Started { .. })));
    assert!(matches!(events.last(), Some(SyncEvent::Stopped { .. })));
    assert!(
        !events.iter().any(|e| matches!(e, SyncEvent::RetryScheduled { .. })),
        "an aborted cycle does not schedule a retry"
    );
    assert!(h.sink.contains("Worker service stopped"));
}

#[tokio::test(start_paused = true)]
async fn no_cycles_after_stop() {
    let feed = MockFeed::serving(50, set_of(5));
    let h = harness(feed.clone());

    let handle = tokio::spawn(Arc::clone(&h.engine).run());
    sleep(Duration::from_secs(1)).await;
    h.engine.stop();
    handle.await.unwrap().unwrap();

    sleep(Duration::from_secs(3 * 60 * 60)).await;
    assert_eq!(feed.fetch_count(), 1);
}

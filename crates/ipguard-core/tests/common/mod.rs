//! Test doubles and common utilities for engine contract tests
//!
//! The doubles count every call so tests can assert how often the engine
//! touched each collaborator, not just what it returned.

#![allow(dead_code)]

use async_trait::async_trait;
use ipguard_core::error::{Error, Result};
use ipguard_core::traits::snapshot_store::BackupInfo;
use ipguard_core::traits::{FeedSource, FirewallClient, MemoryLogSink, SnapshotStore};
use ipguard_core::{
    AddressSet, DeviceConfig, GuardConfig, MemorySnapshotStore, RemoteBatch, RuleConfig,
    Snapshot, SyncEngine, SyncEvent, ThreatLevel,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc, watch};

/// Parse a dotted-quad address
pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

/// Build a set from dotted-quad strings
pub fn ips(addrs: &[&str]) -> AddressSet {
    addrs.iter().map(|s| ip(s)).collect()
}

/// `count` consecutive addresses starting at 10.0.0.0
pub fn set_of(count: u32) -> AddressSet {
    (0..count).map(|i| Ipv4Addr::from(0x0A00_0000 + i)).collect()
}

/// Default configuration against a fictional device
pub fn test_config() -> GuardConfig {
    GuardConfig::new(DeviceConfig::new("fw.test", "admin", "secret"))
}

/// A feed whose lists, failures and latency are controlled by the test
#[derive(Default)]
pub struct MockFeed {
    lists: Mutex<HashMap<u8, AddressSet>>,
    failing_levels: Mutex<HashSet<u8>>,
    failures_remaining: AtomicUsize,
    fetch_count: AtomicUsize,
    fetched_levels: Mutex<Vec<u8>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Feed serving `set` for `level`
    pub fn serving(level: u8, set: AddressSet) -> Arc<Self> {
        let feed = Self::new();
        feed.set_list(level, set);
        feed
    }

    pub fn set_list(&self, level: u8, set: AddressSet) {
        self.lists.lock().unwrap().insert(level, set);
    }

    /// Every fetch of `level` fails
    pub fn fail_level(&self, level: u8) {
        self.failing_levels.lock().unwrap().insert(level);
    }

    /// The next `n` fetches fail, whatever the level
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Make every fetch wait for a notification on the returned handle
    pub fn install_gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Let fetches that have not started yet run without waiting
    pub fn remove_gate(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn fetched_levels(&self) -> Vec<u8> {
        self.fetched_levels.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for MockFeed {
    async fn fetch(&self, level: ThreatLevel) -> Result<AddressSet> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.fetched_levels.lock().unwrap().push(level.value());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let fail_now = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail_now || self.failing_levels.lock().unwrap().contains(&level.value()) {
            return Err(Error::feed_unreachable(format!(
                "threat-{}.txt: connection timed out",
                level
            )));
        }

        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(&level.value())
            .cloned()
            .unwrap_or_default())
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

/// A firewall that keeps pushed objects by name, like the real device
#[derive(Default)]
pub struct RecordingFirewall {
    lists: Mutex<BTreeMap<String, Vec<Ipv4Addr>>>,
    rule_sources: Mutex<Option<Vec<String>>>,
    calls: Mutex<Vec<String>>,
    verify_count: AtomicUsize,
    list_push_count: AtomicUsize,
    rule_push_count: AtomicUsize,
    transport_failures_remaining: AtomicUsize,
    always_fail_transport: AtomicBool,
    reject_auth: AtomicBool,
}

impl RecordingFirewall {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `n` list pushes fail with a transport error
    pub fn fail_next_list_pushes(&self, n: usize) {
        self.transport_failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Every list push fails with a transport error
    pub fn fail_all_list_pushes(&self) {
        self.always_fail_transport.store(true, Ordering::SeqCst);
    }

    /// Every call reports an authentication failure
    pub fn reject_credentials(&self) {
        self.reject_auth.store(true, Ordering::SeqCst);
    }

    pub fn lists(&self) -> BTreeMap<String, Vec<Ipv4Addr>> {
        self.lists.lock().unwrap().clone()
    }

    pub fn rule_sources(&self) -> Option<Vec<String>> {
        self.rule_sources.lock().unwrap().clone()
    }

    /// Call log: `verify`, `list:<name>`, `rule`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn verify_count(&self) -> usize {
        self.verify_count.load(Ordering::SeqCst)
    }

    pub fn list_push_count(&self) -> usize {
        self.list_push_count.load(Ordering::SeqCst)
    }

    pub fn rule_push_count(&self) -> usize {
        self.rule_push_count.load(Ordering::SeqCst)
    }

    fn check_auth(&self) -> Result<()> {
        if self.reject_auth.load(Ordering::SeqCst) {
            return Err(Error::remote_auth("Authentication Failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl FirewallClient for RecordingFirewall {
    async fn verify_connection(&self, _device: &DeviceConfig) -> Result<()> {
        self.verify_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push("verify".to_string());
        self.check_auth()
    }

    async fn push_address_list(&self, _device: &DeviceConfig, batch: &RemoteBatch) -> Result<()> {
        self.list_push_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(format!("list:{}", batch.name));
        self.check_auth()?;

        let fail_now = self.always_fail_transport.load(Ordering::SeqCst)
            || self
                .transport_failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail_now {
            return Err(Error::remote_transport("connection reset by peer"));
        }

        self.lists
            .lock()
            .unwrap()
            .insert(batch.name.clone(), batch.addresses.clone());
        Ok(())
    }

    async fn push_rule(
        &self,
        _device: &DeviceConfig,
        rule: &RuleConfig,
        batch_count: usize,
    ) -> Result<()> {
        self.rule_push_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push("rule".to_string());
        self.check_auth()?;

        let sources = (0..batch_count).map(|i| rule.list_name(i)).collect();
        *self.rule_sources.lock().unwrap() = Some(sources);
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        "recording"
    }
}

/// A store whose saves always fail
pub struct FailingStore {
    inner: MemorySnapshotStore,
    save_count: AtomicUsize,
}

impl FailingStore {
    pub fn with_snapshot(addresses: AddressSet) -> Arc<Self> {
        Arc::new(Self {
            inner: MemorySnapshotStore::with_snapshot(addresses, 5),
            save_count: AtomicUsize::new(0),
        })
    }

    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for FailingStore {
    async fn load(&self) -> Snapshot {
        self.inner.load().await
    }

    async fn save(&self, _addresses: &AddressSet) -> Result<Snapshot> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Err(Error::persist("No space left on device"))
    }

    async fn backups(&self) -> Result<Vec<BackupInfo>> {
        self.inner.backups().await
    }
}

/// Engine plus the handles a test needs to drive and observe it
pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub events: mpsc::Receiver<SyncEvent>,
    pub config_tx: watch::Sender<GuardConfig>,
    pub sink: Arc<MemoryLogSink>,
}

impl Harness {
    pub fn new(
        feed: Arc<MockFeed>,
        firewall: Arc<RecordingFirewall>,
        store: Arc<dyn SnapshotStore>,
        config: GuardConfig,
    ) -> Self {
        let (config_tx, config_rx) = watch::channel(config);
        let sink = Arc::new(MemoryLogSink::default());

        let (engine, events) = SyncEngine::new(feed, firewall, store, sink.clone(), config_rx)
            .expect("engine construction succeeds");

        Self {
            engine: Arc::new(engine),
            events,
            config_tx,
            sink,
        }
    }

    /// Every event emitted so far
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

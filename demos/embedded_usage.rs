//! Minimal embedding example for ipguard-core
//!
//! Runs the sync engine in-process against a canned feed and a firewall
//! that only prints what it would send. Snapshots and the engine log stay
//! in memory, so nothing touches the disk or the network.

use ipguard_core::config::{DeviceConfig, RuleConfig};
use ipguard_core::model::RemoteBatch;
use ipguard_core::traits::{FeedSource, FirewallClient};
use ipguard_core::{
    AddressSet, GuardConfig, MemoryLogSink, MemorySnapshotStore, Result, SyncEngine, SyncEvent,
    ThreatLevel, parse_feed,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Feed serving a text body the application can swap at any time
struct CannedFeed {
    body: Mutex<String>,
}

impl CannedFeed {
    fn new(body: &str) -> Self {
        Self {
            body: Mutex::new(body.to_string()),
        }
    }

    fn replace(&self, body: &str) {
        if let Ok(mut current) = self.body.lock() {
            *current = body.to_string();
        }
    }
}

#[async_trait::async_trait]
impl FeedSource for CannedFeed {
    async fn fetch(&self, level: ThreatLevel) -> Result<AddressSet> {
        let body = self.body.lock().map(|b| b.clone()).unwrap_or_default();
        let set = parse_feed(&body);
        println!("[Feed] level {} -> {} address(es)", level, set.len());
        Ok(set)
    }

    fn source_name(&self) -> &'static str {
        "canned"
    }
}

/// Firewall that prints instead of calling a device
struct PrintingFirewall {
    pushes: AtomicUsize,
}

#[async_trait::async_trait]
impl FirewallClient for PrintingFirewall {
    async fn verify_connection(&self, device: &DeviceConfig) -> Result<()> {
        println!("[Firewall] probing {}", device.api_url());
        Ok(())
    }

    async fn push_address_list(&self, _device: &DeviceConfig, batch: &RemoteBatch) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        println!(
            "[Firewall] list {} <- {} address(es)",
            batch.name,
            batch.addresses.len()
        );
        Ok(())
    }

    async fn push_rule(
        &self,
        _device: &DeviceConfig,
        rule: &RuleConfig,
        batch_count: usize,
    ) -> Result<()> {
        println!(
            "[Firewall] rule {} <- {} list(s)",
            rule.rule_name, batch_count
        );
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        "printing"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    println!("=== Embedded ipguard-core Example ===\n");

    let feed = Arc::new(CannedFeed::new(
        "# demo feed\n203.0.113.7\n198.51.100.0-198.51.100.3\n192.0.2.44\n",
    ));
    let firewall = Arc::new(PrintingFirewall {
        pushes: AtomicUsize::new(0),
    });
    let store = Arc::new(MemorySnapshotStore::default());
    let sink = Arc::new(MemoryLogSink::new(200));

    let mut config = GuardConfig::new(DeviceConfig::new("firewall.example", "demo", "demo"));
    config.threat_level = 30;
    let (_config_tx, config_rx) = watch::channel(config);

    let (engine, mut events) = SyncEngine::new(
        feed.clone(),
        firewall.clone(),
        store.clone(),
        sink.clone(),
        config_rx,
    )?;

    println!("-- first cycle");
    let first = engine.run_cycle().await;
    println!("   outcome: {:?}, added {}\n", first.outcome, first.added.len());

    println!("-- cycle inside the interval (guarded)");
    let guarded = engine.run_cycle().await;
    println!("   outcome: {:?}\n", guarded.outcome);

    println!("-- feed changed, forced cycle");
    feed.replace("203.0.113.7\n198.51.100.0-198.51.100.1\n192.0.2.99\n");
    let forced = engine.force_cycle().await;
    println!(
        "   outcome: {:?}, added {:?}, removed {:?}\n",
        forced.outcome, forced.added, forced.removed
    );

    println!("Firewall list pushes: {}", firewall.pushes.load(Ordering::SeqCst));
    println!("Backups kept: {}", store.backup_count().await);

    println!("\nEngine log:");
    for line in sink.lines() {
        println!("  {}", line);
    }

    println!("\nEvents:");
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::CycleFinished(result) = event {
            println!("  finished: {:?}", result.outcome);
        } else {
            println!("  {:?}", event);
        }
    }

    Ok(())
}

// # ipguard-core
//
// Core library for the ipguard threat-feed to firewall synchronizer.
//
// ## Architecture Overview
//
// This library provides everything except the concrete transports:
// - **FeedSource**: Trait for downloading one threat level
// - **FirewallClient**: Trait for pushing address lists and the blocking rule
// - **SnapshotStore**: Trait for the persisted list and its backups
// - **LogSink**: Append-only text log owned by the host
// - **SyncEngine**: Single-flight cycle (fetch, diff, persist, push) and its scheduler
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Engine logic is separate from transports
// 2. **Single Flight**: At most one cycle runs; overlapping triggers are dropped
// 3. **Phase-Scoped Retries**: Fetch and push are retried independently
// 4. **Library-First**: The daemon is a thin shell around this crate
// 5. **Idempotency**: List objects and the rule are upserted by name

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod retry;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{DeviceConfig, EngineConfig, FeedConfig, GuardConfig, RuleConfig, StorageConfig};
pub use engine::{SyncEngine, SyncEvent};
pub use error::{Error, ErrorKind, Result};
pub use model::{
    AddressSet, CycleError, CycleOutcome, MAX_BATCH_SIZE, RemoteBatch, Snapshot, SyncCycleResult,
    ThreatLevel,
};
pub use parser::parse_feed;
pub use retry::RetryPolicy;
pub use state::{FileSnapshotStore, MemorySnapshotStore};
pub use traits::{FeedSource, FirewallClient, LogSink, MemoryLogSink, SnapshotStore, TracingLogSink};

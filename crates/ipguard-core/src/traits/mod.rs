//! Core traits for the ipguard system
//!
//! This module defines the seams between the engine and its collaborators.
//!
//! - [`FeedSource`]: Download and parse one threat level
//! - [`FirewallClient`]: Push address lists and the blocking rule
//! - [`SnapshotStore`]: Persist the applied list with backups
//! - [`LogSink`]: Append-only text log owned by the host application

pub mod feed_source;
pub mod firewall_client;
pub mod log_sink;
pub mod snapshot_store;

pub use feed_source::FeedSource;
pub use firewall_client::FirewallClient;
pub use log_sink::{LogSink, MemoryLogSink, TracingLogSink};
pub use snapshot_store::SnapshotStore;

// # Snapshot Store Trait
//
// Defines the interface for persisting the list currently applied to the
// firewall.
//
// ## Purpose
//
// The snapshot is the engine's memory between cycles: the next cycle diffs
// its fetch against it, and an empty fetch never replaces a non-empty
// snapshot.
//
// ## Implementations
//
// - File-based: JSON file + rotated timestamped backups
// - Memory: for tests and embedding

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::model::{AddressSet, Snapshot};

/// A retained backup of an earlier snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    /// File name or other store-specific identifier
    pub name: String,
    /// Location on disk, if the store is file based
    pub path: Option<PathBuf>,
    /// Creation time of the backup
    pub created: DateTime<Utc>,
}

/// Trait for snapshot store implementations
///
/// The store is the only writer of snapshot state. Outside readers must
/// treat stored data as read-only.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Return the current snapshot
    ///
    /// Never fails: a missing or unreadable snapshot degrades to
    /// [`Snapshot::empty`] after logging the cause.
    async fn load(&self) -> Snapshot;

    /// Replace the current snapshot with `addresses`
    ///
    /// The previous current snapshot must stay intact if this fails.
    /// Returns the snapshot that was written.
    async fn save(&self, addresses: &AddressSet) -> Result<Snapshot, crate::Error>;

    /// Retained backups, newest first
    async fn backups(&self) -> Result<Vec<BackupInfo>, crate::Error>;
}

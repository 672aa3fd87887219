// # Memory Snapshot Store
//
// In-memory implementation of SnapshotStore.
//
// ## Crash Behavior
//
// - All state is lost on restart
// - The first cycle after a restart diffs against an empty snapshot and
//   pushes the full list again (harmless, pushes are upserts)
//
// ## When to Use
//
// - Testing environments
// - Embedding the engine where the host owns persistence

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{AddressSet, Snapshot};
use crate::traits::snapshot_store::{BackupInfo, SnapshotStore};

#[derive(Debug, Default)]
struct Inner {
    current: Snapshot,
    /// Newest first
    backups: VecDeque<(BackupInfo, Snapshot)>,
}

/// In-memory snapshot store
///
/// Keeps the current snapshot plus up to `max_backups` earlier ones.
///
/// # Example
///
/// ```rust,no_run
/// use ipguard_core::state::MemorySnapshotStore;
/// use ipguard_core::traits::SnapshotStore;
/// use ipguard_core::AddressSet;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemorySnapshotStore::new(5);
///     let set: AddressSet = ["1.2.3.4".parse()?].into_iter().collect();
///     store.save(&set).await?;
///     assert_eq!(store.load().await.addresses, set);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemorySnapshotStore {
    inner: Arc<RwLock<Inner>>,
    max_backups: usize,
}

impl MemorySnapshotStore {
    pub fn new(max_backups: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            max_backups,
        }
    }

    /// Start from an existing snapshot, as if it had been saved earlier
    pub fn with_snapshot(addresses: AddressSet, max_backups: usize) -> Self {
        let inner = Inner {
            current: Snapshot::new(addresses, Utc::now()),
            backups: VecDeque::new(),
        };
        Self {
            inner: Arc::new(RwLock::new(inner)),
            max_backups,
        }
    }

    /// Number of saves retained as backups
    pub async fn backup_count(&self) -> usize {
        self.inner.read().await.backups.len()
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new(super::file::DEFAULT_MAX_BACKUPS)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Snapshot {
        self.inner.read().await.current.clone()
    }

    async fn save(&self, addresses: &AddressSet) -> Result<Snapshot, Error> {
        let mut inner = self.inner.write().await;
        let timestamp = Utc::now();
        let snapshot = Snapshot::new(addresses.clone(), timestamp);

        let info = BackupInfo {
            name: format!("ip_list_{}", timestamp.format("%Y%m%d%H%M%S%3f")),
            path: None,
            created: timestamp,
        };
        inner.backups.push_front((info, snapshot.clone()));
        inner.backups.truncate(self.max_backups);
        inner.current = snapshot.clone();

        Ok(snapshot)
    }

    async fn backups(&self) -> Result<Vec<BackupInfo>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.backups.iter().map(|(info, _)| info.clone()).collect())
    }
}

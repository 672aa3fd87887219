// # File Snapshot Store
//
// File-based implementation of SnapshotStore with crash-safe writes and
// rotated backups.
//
// ## Layout
//
// ```text
// <dir>/current_ip_list.json          current snapshot
// <dir>/current_ip_list.json.tmp      in-flight write (transient)
// <dir>/ip_list_<timestamp>.json      backups, newest 5 kept
// ```
//
// ## Crash Safety
//
// - Atomic writes: new snapshot written to a temp file in the same
//   directory, synced, then renamed over the current file
// - Backup: only after the rename succeeded is the current file copied to a
//   timestamped backup
// - Recovery: an unreadable current file falls back to the newest readable
//   backup on load
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "ip_addresses": ["1.2.3.4", "5.6.7.8"],
//   "last_updated": "2025-01-09T12:00:00Z",
//   "count": 2
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::model::{AddressSet, Snapshot};
use crate::traits::snapshot_store::{BackupInfo, SnapshotStore};

/// Snapshot file format version
/// Used for future migration if format changes
const SNAPSHOT_FILE_VERSION: &str = "1.0";

const CURRENT_FILE_NAME: &str = "current_ip_list.json";
const BACKUP_PREFIX: &str = "ip_list_";
const BACKUP_SUFFIX: &str = ".json";

/// Default number of backups kept next to the current snapshot
pub const DEFAULT_MAX_BACKUPS: usize = 5;

/// File-based snapshot store
///
/// # Example
///
/// ```rust,no_run
/// use ipguard_core::state::FileSnapshotStore;
/// use ipguard_core::traits::SnapshotStore;
/// use ipguard_core::AddressSet;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileSnapshotStore::new("/var/lib/ipguard", 5).await?;
///
///     let set: AddressSet = ["1.2.3.4".parse()?].into_iter().collect();
///     store.save(&set).await?;
///
///     let snapshot = store.load().await;
///     assert_eq!(snapshot.count, 1);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    max_backups: usize,
    /// Serializes writers; readers go straight to disk
    write_lock: Mutex<()>,
}

/// Serializable snapshot file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SnapshotFile {
    #[serde(default = "default_version")]
    version: String,
    ip_addresses: Vec<String>,
    last_updated: DateTime<Utc>,
    count: usize,
}

fn default_version() -> String {
    SNAPSHOT_FILE_VERSION.to_string()
}

impl FileSnapshotStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(dir: P, max_backups: usize) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();

        if !dir.exists() {
            fs::create_dir_all(&dir).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create snapshot directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            dir,
            max_backups,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the current snapshot file
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE_NAME)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tmp", CURRENT_FILE_NAME))
    }

    /// Pick an unused backup path for `timestamp`
    fn backup_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        let stem = format!("{}{}", BACKUP_PREFIX, timestamp.format("%Y%m%d%H%M%S%3f"));
        let mut path = self.dir.join(format!("{}{}", stem, BACKUP_SUFFIX));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{:03}{}", stem, n, BACKUP_SUFFIX));
            n += 1;
        }
        path
    }

    fn is_backup_name(name: &str) -> bool {
        name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)
    }

    /// Read and decode one snapshot file
    ///
    /// `Ok(None)` means the file does not exist.
    async fn read_snapshot(path: &Path) -> Result<Option<Snapshot>, Error> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::persist(format!(
                    "Failed to read snapshot file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let file: SnapshotFile = serde_json::from_str(&content).map_err(|e| {
            Error::persist(format!(
                "Failed to parse snapshot file {}: {}",
                path.display(),
                e
            ))
        })?;

        if file.version != SNAPSHOT_FILE_VERSION {
            tracing::warn!(
                "Snapshot file version mismatch: expected {}, got {}. Attempting to load anyway.",
                SNAPSHOT_FILE_VERSION,
                file.version
            );
        }

        let mut addresses = AddressSet::new();
        let mut invalid = 0usize;
        for raw in &file.ip_addresses {
            match raw.trim().parse::<Ipv4Addr>() {
                Ok(addr) => {
                    addresses.insert(addr);
                }
                Err(_) => invalid += 1,
            }
        }
        if invalid > 0 {
            tracing::warn!(
                "Ignored {} invalid addresses in snapshot file {}",
                invalid,
                path.display()
            );
        }
        if addresses.len() != file.count {
            tracing::debug!(
                "Snapshot file {} declares {} addresses, found {}",
                path.display(),
                file.count,
                addresses.len()
            );
        }

        Ok(Some(Snapshot::new(addresses, file.last_updated)))
    }

    /// Write `file` to the temp path and rename it over the current file
    async fn write_current(&self, file: &SnapshotFile) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(file)
            .map_err(|e| Error::persist(format!("Failed to serialize snapshot: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::persist(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::persist(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.sync_all().await.map_err(|e| {
                Error::persist(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        let current = self.current_path();
        fs::rename(&temp_path, &current).await.map_err(|e| {
            Error::persist(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                current.display(),
                e
            ))
        })
    }

    /// Backups on disk with their creation time, newest first
    async fn list_backups(&self) -> Result<Vec<BackupInfo>, Error> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| {
            Error::persist(format!(
                "Failed to list snapshot directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !Self::is_backup_name(&name) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("Failed to stat backup {}: {}", name, e);
                    continue;
                }
            };
            // Creation time is not available on every filesystem
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            backups.push(BackupInfo {
                name,
                path: Some(entry.path()),
                created: DateTime::<Utc>::from(created),
            });
        }

        // Backup names encode their timestamp, so they break ties between
        // files created within the filesystem's timestamp resolution
        backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
        Ok(backups)
    }

    /// Delete all but the newest `max_backups` backups
    ///
    /// Best effort: failures are logged and skipped.
    async fn rotate_backups(&self) {
        let backups = match self.list_backups().await {
            Ok(backups) => backups,
            Err(e) => {
                tracing::error!("Error cleaning up old backups: {}", e);
                return;
            }
        };

        for backup in backups.into_iter().skip(self.max_backups) {
            let Some(path) = backup.path else { continue };
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Removed old backup {}", backup.name),
                Err(e) => tracing::warn!("Error deleting backup file {}: {}", backup.name, e),
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Snapshot {
        let current = self.current_path();
        match Self::read_snapshot(&current).await {
            Ok(Some(snapshot)) => {
                tracing::debug!("Loaded snapshot: {} addresses", snapshot.count);
                return snapshot;
            }
            Ok(None) => {
                tracing::debug!("Snapshot file does not exist: {}", current.display());
                return Snapshot::empty();
            }
            Err(e) => {
                tracing::error!("Error loading snapshot: {}. Attempting recovery from backup.", e);
            }
        }

        let backups = match self.list_backups().await {
            Ok(backups) => backups,
            Err(e) => {
                tracing::error!("Cannot list backups: {}. Starting with empty snapshot.", e);
                return Snapshot::empty();
            }
        };

        for backup in backups {
            let Some(path) = backup.path else { continue };
            match Self::read_snapshot(&path).await {
                Ok(Some(snapshot)) => {
                    tracing::info!(
                        "Recovered snapshot from backup {}: {} addresses",
                        backup.name,
                        snapshot.count
                    );
                    return snapshot;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Backup {} unreadable: {}", backup.name, e),
            }
        }

        tracing::warn!("No readable backup found. Starting with empty snapshot.");
        Snapshot::empty()
    }

    async fn save(&self, addresses: &AddressSet) -> Result<Snapshot, Error> {
        let _guard = self.write_lock.lock().await;

        let timestamp = Utc::now();
        let file = SnapshotFile {
            version: SNAPSHOT_FILE_VERSION.to_string(),
            ip_addresses: addresses.to_strings(),
            last_updated: timestamp,
            count: addresses.len(),
        };

        self.write_current(&file).await?;

        let backup_path = self.backup_path(timestamp);
        fs::copy(self.current_path(), &backup_path).await.map_err(|e| {
            Error::persist(format!(
                "Failed to create backup {}: {}",
                backup_path.display(),
                e
            ))
        })?;

        self.rotate_backups().await;

        tracing::trace!("Snapshot written: {} addresses", file.count);
        Ok(Snapshot::new(addresses.clone(), timestamp))
    }

    async fn backups(&self) -> Result<Vec<BackupInfo>, Error> {
        self.list_backups().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set(addrs: &[&str]) -> AddressSet {
        addrs.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_load_without_snapshot_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), DEFAULT_MAX_BACKUPS).await.unwrap();

        let snapshot = store.load().await;
        assert!(snapshot.addresses.is_empty());
        assert_eq!(snapshot.count, 0);
        assert!(snapshot.last_updated.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), DEFAULT_MAX_BACKUPS).await.unwrap();

        let addresses = set(&["1.2.3.4", "8.8.8.8", "10.0.0.1"]);
        let saved = store.save(&addresses).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.addresses, addresses);
        assert_eq!(loaded.count, 3);
        assert_eq!(loaded.last_updated, saved.last_updated);

        // A new instance sees the same data
        let store2 = FileSnapshotStore::new(dir.path(), DEFAULT_MAX_BACKUPS).await.unwrap();
        assert_eq!(store2.load().await.addresses, addresses);
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), DEFAULT_MAX_BACKUPS).await.unwrap();

        store.save(&set(&["1.1.1.1"])).await.unwrap();

        assert!(store.current_path().exists());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_backup_retention() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), DEFAULT_MAX_BACKUPS).await.unwrap();

        for i in 0..8u8 {
            store.save(&set(&[&format!("10.0.0.{}", i)])).await.unwrap();
        }

        let backups = store.backups().await.unwrap();
        assert_eq!(backups.len(), 5);

        // Newest first: the newest backup holds the last save
        let newest = backups[0].path.clone().unwrap();
        let snapshot = FileSnapshotStore::read_snapshot(&newest).await.unwrap().unwrap();
        assert_eq!(snapshot.addresses, set(&["10.0.0.7"]));

        let oldest = backups[4].path.clone().unwrap();
        let snapshot = FileSnapshotStore::read_snapshot(&oldest).await.unwrap().unwrap();
        assert_eq!(snapshot.addresses, set(&["10.0.0.3"]));
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_recovers_from_backup() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), DEFAULT_MAX_BACKUPS).await.unwrap();

        store.save(&set(&["1.2.3.4", "5.6.7.8"])).await.unwrap();
        fs::write(store.current_path(), b"corrupted json data").await.unwrap();

        let recovered = store.load().await;
        assert_eq!(recovered.addresses, set(&["1.2.3.4", "5.6.7.8"]));
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_without_backup_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), DEFAULT_MAX_BACKUPS).await.unwrap();

        fs::write(store.current_path(), b"{ not json").await.unwrap();

        assert_eq!(store.load().await, Snapshot::empty());
    }

    #[tokio::test]
    async fn test_save_failure_surfaces() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path(), DEFAULT_MAX_BACKUPS).await.unwrap();
        store.save(&set(&["1.1.1.1"])).await.unwrap();

        // A directory squatting on the temp path makes the write fail
        fs::create_dir(store.temp_path()).await.unwrap();

        let result = store.save(&set(&["2.2.2.2"])).await;
        assert!(matches!(result, Err(Error::Persist(_))));

        // The previous snapshot is untouched
        assert_eq!(store.load().await.addresses, set(&["1.1.1.1"]));
    }
}

//! Data model shared by the parser, the stores and the engine

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, ErrorKind, Result};

/// Largest number of addresses the firewall accepts in one list object
pub const MAX_BATCH_SIZE: usize = 1000;

/// Feed granularity selector
///
/// `0` is the complete (largest) feed, `100` the smallest and most curated.
/// Values outside of `[0, 100]` are rejected rather than clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreatLevel(u8);

impl ThreatLevel {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 100;

    /// Validate a raw level
    pub fn new(level: i64) -> Result<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&level) {
            Ok(Self(level as u8))
        } else {
            Err(Error::InvalidThreatLevel(level))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u32> for ThreatLevel {
    type Error = Error;

    fn try_from(level: u32) -> Result<Self> {
        Self::new(level as i64)
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deduplicated set of IPv4 addresses
///
/// Addresses are stored parsed, so textual variants of the same address
/// collapse to one entry. Iteration happens to be in numeric order, which
/// keeps batch contents stable between cycles, but callers must not rely
/// on any particular order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet(BTreeSet<Ipv4Addr>);

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, addr: &Ipv4Addr) -> bool {
        self.0.contains(addr)
    }

    /// Insert an address, returning `true` if it was not present yet
    pub fn insert(&mut self, addr: Ipv4Addr) -> bool {
        self.0.insert(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ipv4Addr> {
        self.0.iter()
    }

    /// Add every address of `other`, returning how many were new
    pub fn absorb(&mut self, other: AddressSet) -> usize {
        let before = self.0.len();
        self.0.extend(other.0);
        self.0.len() - before
    }

    /// Addresses present in `self` but not in `other`
    pub fn difference(&self, other: &AddressSet) -> Vec<Ipv4Addr> {
        self.0.difference(&other.0).copied().collect()
    }

    /// Dotted-quad rendering of every address
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(Ipv4Addr::to_string).collect()
    }
}

impl FromIterator<Ipv4Addr> for AddressSet {
    fn from_iter<I: IntoIterator<Item = Ipv4Addr>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a AddressSet {
    type Item = &'a Ipv4Addr;
    type IntoIter = std::collections::btree_set::Iter<'a, Ipv4Addr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The list currently considered applied to the firewall
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub addresses: AddressSet,
    /// `None` when nothing was ever saved
    pub last_updated: Option<DateTime<Utc>>,
    pub count: usize,
}

impl Snapshot {
    /// The snapshot reported before the first save
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(addresses: AddressSet, last_updated: DateTime<Utc>) -> Self {
        let count = addresses.len();
        Self {
            addresses,
            last_updated: Some(last_updated),
            count,
        }
    }
}

/// One named chunk of the address set pushed as a single list object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBatch {
    pub index: usize,
    pub name: String,
    pub addresses: Vec<Ipv4Addr>,
}

/// Name of the list object holding batch `index`
pub fn batch_name(prefix: &str, index: usize) -> String {
    format!("{}_{}", prefix, index)
}

impl RemoteBatch {
    /// Split `set` into batches of at most `size` addresses
    ///
    /// `size` is capped at [`MAX_BATCH_SIZE`]. Names are derived from the
    /// batch index only, so the same set always maps to the same names.
    pub fn split(set: &AddressSet, prefix: &str, size: usize) -> Vec<RemoteBatch> {
        let size = size.clamp(1, MAX_BATCH_SIZE);
        let addresses: Vec<Ipv4Addr> = set.iter().copied().collect();

        addresses
            .chunks(size)
            .enumerate()
            .map(|(index, chunk)| RemoteBatch {
                index,
                name: batch_name(prefix, index),
                addresses: chunk.to_vec(),
            })
            .collect()
    }
}

/// How a synchronization cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New list persisted and pushed
    Success,
    /// Nothing to do (guard interval, identical list, or empty feed with no history)
    NoChange,
    /// Unrecovered failure; a short retry is scheduled
    Failed,
    /// Another cycle was already running
    Skipped,
}

/// Error carried by a failed cycle result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for CycleError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Record of one engine run, used for logging and retry decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCycleResult {
    pub started_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub added: Vec<Ipv4Addr>,
    pub removed: Vec<Ipv4Addr>,
    pub error: Option<CycleError>,
}

impl SyncCycleResult {
    pub fn with_outcome(started_at: DateTime<Utc>, outcome: CycleOutcome) -> Self {
        Self {
            started_at,
            outcome,
            added: Vec::new(),
            removed: Vec::new(),
            error: None,
        }
    }

    pub fn skipped(started_at: DateTime<Utc>) -> Self {
        Self::with_outcome(started_at, CycleOutcome::Skipped)
    }

    pub fn no_change(started_at: DateTime<Utc>) -> Self {
        Self::with_outcome(started_at, CycleOutcome::NoChange)
    }

    pub fn failed(started_at: DateTime<Utc>, err: &Error) -> Self {
        Self {
            error: Some(CycleError::from(err)),
            ..Self::with_outcome(started_at, CycleOutcome::Failed)
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(count: u32) -> AddressSet {
        (0..count).map(|i| Ipv4Addr::from(0x0A00_0000 + i)).collect()
    }

    #[test]
    fn threat_level_bounds() {
        assert_eq!(ThreatLevel::new(0).unwrap().value(), 0);
        assert_eq!(ThreatLevel::new(100).unwrap().value(), 100);
        assert!(matches!(
            ThreatLevel::new(101),
            Err(Error::InvalidThreatLevel(101))
        ));
        assert!(ThreatLevel::new(-1).is_err());
        assert!(ThreatLevel::try_from(250u32).is_err());
    }

    #[test]
    fn split_2500_into_three_batches() {
        let batches = RemoteBatch::split(&set_of(2500), "IPThreatList", MAX_BATCH_SIZE);

        let sizes: Vec<usize> = batches.iter().map(|b| b.addresses.len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);

        let names: Vec<&str> = batches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["IPThreatList_0", "IPThreatList_1", "IPThreatList_2"]);
    }

    #[test]
    fn split_caps_batch_size() {
        let batches = RemoteBatch::split(&set_of(1500), "L", 5000);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.addresses.len() <= MAX_BATCH_SIZE));
    }

    #[test]
    fn split_empty_set_yields_no_batches() {
        assert!(RemoteBatch::split(&AddressSet::new(), "L", 1000).is_empty());
    }

    #[test]
    fn absorb_counts_only_new_addresses() {
        let mut primary: AddressSet = ["1.1.1.1", "2.2.2.2"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let extra: AddressSet = ["2.2.2.2", "3.3.3.3"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();

        assert_eq!(primary.absorb(extra), 1);
        assert_eq!(primary.len(), 3);
    }

    #[test]
    fn snapshot_count_tracks_set_size() {
        let snapshot = Snapshot::new(set_of(7), Utc::now());
        assert_eq!(snapshot.count, 7);
        assert!(Snapshot::empty().last_updated.is_none());
    }
}

//! # snap-storage
//!
//! why: the key-value store the snapshot protocol writes markers and test keys into
//! relations: used by snap-cluster for failure markers, workload keys and restart info
//! what: KeyValueStore trait, FileStore implementation, InMemoryStore for testing

pub mod error;
pub mod restart_info;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

pub use error::StoreError;

/// Key/value pair as stored
pub type KeyValue = (String, String);

/// One page of a range read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub entries: Vec<KeyValue>,
    /// true when the range holds entries past the last one returned
    pub more: bool,
}

/// trait for the transactional key-value store
///
/// this abstraction allows the same code to work with:
/// - a node data folder on disk (copied by simulated snapshots)
/// - in-memory (testing)
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// read a single key
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// atomically apply every write in the batch
    async fn commit(&self, writes: Vec<KeyValue>) -> Result<(), StoreError>;

    /// read keys in `[begin, end)` in order, at most `limit` of them
    async fn scan(&self, begin: &str, end: &str, limit: usize) -> Result<ScanResult, StoreError>;

    /// write a single key
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.commit(vec![(key.to_string(), value.to_string())]).await
    }
}

fn scan_map(map: &BTreeMap<String, String>, begin: &str, end: &str, limit: usize) -> ScanResult {
    if begin >= end {
        return ScanResult::default();
    }
    let mut range = map.range::<str, _>((Bound::Included(begin), Bound::Excluded(end)));
    let entries: Vec<KeyValue> = range
        .by_ref()
        .take(limit)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let more = range.next().is_some();
    ScanResult { entries, more }
}

// -- file store implementation --

/// file-based store inside a node data folder
///
/// the whole map lives in kv.json and is rewritten atomically on commit,
/// so copying the folder yields a consistent point-in-time image
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// open a store in `dir`, creating the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn data_path(&self) -> PathBuf {
        self.dir.join("kv.json")
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let path = self.data_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let mut file = File::open(&path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn save(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let json = serde_json::to_string(map).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        // atomic write: write to temp file then rename
        let temp_path = self.dir.join("kv.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.data_path())?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.get(key).cloned())
    }

    async fn commit(&self, writes: Vec<KeyValue>) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        let mut map = self.load()?;
        let count = writes.len();
        map.extend(writes);
        self.save(&map)?;
        debug!(dir = %self.dir.display(), count, "committed writes");
        Ok(())
    }

    async fn scan(&self, begin: &str, end: &str, limit: usize) -> Result<ScanResult, StoreError> {
        Ok(scan_map(&self.load()?, begin, end, limit))
    }
}

// -- in-memory store implementation --

/// in-memory store for testing
///
/// stores all state in memory, no persistence across restarts. conflicts can
/// be injected to exercise caller retry loops.
#[derive(Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<String, String>>,
    pending_conflicts: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// make the next `n` commits fail with `StoreError::Conflict`
    pub fn inject_conflicts(&self, n: usize) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn commit(&self, writes: Vec<KeyValue>) -> Result<(), StoreError> {
        let conflicted = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(StoreError::Conflict);
        }
        self.data.write().extend(writes);
        Ok(())
    }

    async fn scan(&self, begin: &str, end: &str, limit: usize) -> Result<ScanResult, StoreError> {
        Ok(scan_map(&self.data.read(), begin, end, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn in_memory_store_sets_and_gets() {
        let store = InMemoryStore::new();
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = InMemoryStore::new();
        store.inject_conflicts(1);
        let err = store.set("a", "1").await.unwrap_err();
        assert!(err.is_retryable());
        store.set("a", "1").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn file_store_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::new(dir.path()).unwrap();
            store.set("k", "v").await.unwrap();
        }
        let store = FileStore::new(dir.path()).unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[test]
    fn scan_reports_more_when_limited() {
        let map: BTreeMap<String, String> = (0..5).map(|i| (format!("k{i}"), i.to_string())).collect();
        let page = scan_map(&map, "k0", "k9", 2);
        assert_eq!(page.entries.len(), 2);
        assert!(page.more);
        let rest = scan_map(&map, "k2", "k9", 10);
        assert_eq!(rest.entries.len(), 3);
        assert!(!rest.more);
    }
}

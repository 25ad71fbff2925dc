use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, error, info};

use super::cursor::{WatchCursor, WatchState};
use super::error::{LedgerError, Result};
use super::keys::{
    DESTINATIONS_PREFIX, decode_destinations_key, encode_cursor_key, encode_destinations_key,
    encode_entry_key, encode_history_key, encode_history_prefix, encode_partition_prefix,
    encode_watch_state_key, validate_component, validate_key,
};
use super::state::{HistoryRecord, LedgerEntry, LedgerKey, Transition, apply};
use super::traits::{Ledger, WatchStore};

/// Per-key mutexes, created on demand and dropped once unused
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn acquire(&self, raw: &[u8]) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(raw.to_vec()).or_default().clone()
    }

    fn release(&self, raw: &[u8], lock: Arc<Mutex<()>>) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if map.get(raw).is_some_and(|held| Arc::strong_count(held) == 1) {
            map.remove(raw);
        }
    }
}

/// Fjall-backed ledger of entries, per-key history and watcher metadata
#[derive(Clone)]
pub struct FjallLedger {
    keyspace: Keyspace,
    entries: PartitionHandle,
    history: PartitionHandle,
    metadata: PartitionHandle,
    locks: Arc<KeyLocks>,
}

impl FjallLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let entries = keyspace.open_partition("entries", PartitionCreateOptions::default())?;
        let history = keyspace.open_partition("history", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            entries,
            history,
            metadata,
            locks: Arc::new(KeyLocks::default()),
        })
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    fn read_entry(&self, raw: &[u8]) -> Result<Option<LedgerEntry>> {
        match self.entries.get(raw)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn upsert_locked(
        &self,
        raw: &[u8],
        key: &LedgerKey,
        transition: Transition,
    ) -> Result<LedgerEntry> {
        let current = self.read_entry(raw)?;
        let applied = apply(current.as_ref(), key, transition, Utc::now())?;

        let Some(record) = applied.record else {
            return Ok(applied.entry);
        };

        let mut batch = self.keyspace.batch();
        batch.insert(&self.entries, raw, serde_json::to_vec(&applied.entry)?);
        batch.insert(
            &self.history,
            encode_history_key(key),
            serde_json::to_vec(&record)?,
        );
        batch.commit()?;

        debug!(
            %key,
            transition = %record.transition,
            to = %record.to,
            "Ledger entry updated"
        );
        Ok(applied.entry)
    }

    fn read_metadata<T: serde::de::DeserializeOwned>(&self, raw: &[u8]) -> Result<Option<T>> {
        match self.metadata.get(raw)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn write_metadata<T: serde::Serialize>(&self, raw: Vec<u8>, value: &T) -> Result<()> {
        self.metadata.insert(raw, serde_json::to_vec(value)?)?;
        Ok(())
    }
}

impl Ledger for FjallLedger {
    fn get(&self, key: &LedgerKey) -> Result<Option<LedgerEntry>> {
        validate_key(key)?;
        self.read_entry(&encode_entry_key(key))
    }

    fn upsert(&self, key: &LedgerKey, transition: Transition) -> Result<LedgerEntry> {
        validate_key(key)?;
        let raw = encode_entry_key(key);
        let lock = self.locks.acquire(&raw);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.upsert_locked(&raw, key, transition)
        };
        self.locks.release(&raw, lock);

        if let Err(e) = &result {
            if e.is_invalid_transition() {
                error!(%key, error = %e, "Rejected ledger transition");
            }
        }
        result
    }

    fn list_by_partition(&self, partition: &str) -> Result<Vec<LedgerEntry>> {
        validate_component("partition", partition)?;
        let snapshot = self.entries.snapshot();
        let mut results = Vec::new();
        for item in snapshot.prefix(encode_partition_prefix(partition)) {
            // snapshot iterators yield the lower-level lsm-tree error
            let (_, value) = item.map_err(fjall::Error::from)?;
            results.push(serde_json::from_slice(&value)?);
        }
        Ok(results)
    }

    fn partitions(&self) -> Result<Vec<String>> {
        let mut results = Vec::new();
        for item in self.metadata.prefix(DESTINATIONS_PREFIX) {
            let (key, _) = item?;
            if let Some(partition) = decode_destinations_key(&key) {
                results.push(partition);
            }
        }
        Ok(results)
    }

    fn history(&self, key: &LedgerKey) -> Result<Vec<HistoryRecord>> {
        validate_key(key)?;
        let mut results = Vec::new();
        for item in self.history.prefix(encode_history_prefix(key)) {
            let (_, value) = item?;
            results.push(serde_json::from_slice(&value)?);
        }
        Ok(results)
    }

    fn bind_destinations(&self, partition: &str, destinations: &[String]) -> Result<()> {
        validate_component("partition", partition)?;
        for destination in destinations {
            validate_component("destination", destination)?;
        }

        let raw = encode_destinations_key(partition);
        let lock = self.locks.acquire(&raw);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            match self.read_metadata::<Vec<String>>(&raw) {
                Ok(Some(recorded)) if recorded != destinations => {
                    Err(LedgerError::DestinationsChanged {
                        partition: partition.to_string(),
                        recorded,
                        configured: destinations.to_vec(),
                    })
                }
                Ok(Some(_)) => Ok(()),
                Ok(None) => {
                    info!(partition, ?destinations, "Binding partition destinations");
                    self.write_metadata(raw.clone(), &destinations)
                }
                Err(e) => Err(e),
            }
        };
        self.locks.release(&raw, lock);
        result
    }
}

impl WatchStore for FjallLedger {
    fn load_cursor(&self, watcher: &str) -> Result<Option<WatchCursor>> {
        self.read_metadata(&encode_cursor_key(watcher))
    }

    fn save_cursor(&self, watcher: &str, cursor: &WatchCursor) -> Result<()> {
        self.write_metadata(encode_cursor_key(watcher), cursor)
    }

    fn load_watch_state(&self, watcher: &str) -> Result<Option<WatchState>> {
        self.read_metadata(&encode_watch_state_key(watcher))
    }

    fn save_watch_state(&self, watcher: &str, state: &WatchState) -> Result<()> {
        self.write_metadata(encode_watch_state_key(watcher), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ItemState;
    use crate::model::{FailureClass, ItemDescriptor};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_ledger() -> (FjallLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FjallLedger::open(temp_dir.path().join("test_ledger")).unwrap();
        (ledger, temp_dir)
    }

    fn discover(ledger: &FjallLedger, key: &LedgerKey) -> LedgerEntry {
        let item = ItemDescriptor::builder()
            .id(key.item.clone())
            .name(format!("{}.mp4", key.item))
            .build();
        ledger.upsert(key, Transition::Discover(item)).unwrap()
    }

    #[test]
    fn test_open_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FjallLedger::open(temp_dir.path().join("test_ledger"));
        assert!(ledger.is_ok());
    }

    #[test]
    fn test_get_missing_entry() {
        let (ledger, _temp) = create_test_ledger();
        let result = ledger.get(&LedgerKey::new("p", "i", "d")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_second_discover_is_transition_on_first() {
        let (ledger, _temp) = create_test_ledger();
        let key = LedgerKey::new("1999", "vid-1", "rumble");

        discover(&ledger, &key);
        ledger.upsert(&key, Transition::BeginDownload).unwrap();
        let again = discover(&ledger, &key);

        assert_eq!(again.state, ItemState::Downloading);
        assert_eq!(ledger.list_by_partition("1999").unwrap().len(), 1);
        // discover + begin_download; the repeated discover writes nothing
        assert_eq!(ledger.history(&key).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_transition_leaves_entry_untouched() {
        let (ledger, _temp) = create_test_ledger();
        let key = LedgerKey::new("1999", "vid-1", "rumble");
        discover(&ledger, &key);

        let err = ledger
            .upsert(
                &key,
                Transition::Complete {
                    reference: "x".to_string(),
                },
            )
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(
            ledger.get(&key).unwrap().unwrap().state,
            ItemState::Discovered
        );
    }

    #[test]
    fn test_list_by_partition_is_scoped() {
        let (ledger, _temp) = create_test_ledger();
        discover(&ledger, &LedgerKey::new("2000", "a", "d1"));
        discover(&ledger, &LedgerKey::new("2000", "a", "d2"));
        discover(&ledger, &LedgerKey::new("20001", "a", "d1"));

        assert_eq!(ledger.list_by_partition("2000").unwrap().len(), 2);
        assert_eq!(ledger.list_by_partition("20001").unwrap().len(), 1);
        assert!(ledger.list_by_partition("2001").unwrap().is_empty());
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");
        let key = LedgerKey::new("p", "i", "d");

        {
            let ledger = FjallLedger::open(&path).unwrap();
            discover(&ledger, &key);
            ledger.upsert(&key, Transition::BeginDownload).unwrap();
            ledger
                .upsert(
                    &key,
                    Transition::Fail {
                        class: FailureClass::Transient,
                        message: "timeout".to_string(),
                    },
                )
                .unwrap();
            ledger.persist().unwrap();
        }

        let ledger = FjallLedger::open(&path).unwrap();
        let entry = ledger.get(&key).unwrap().unwrap();
        assert_eq!(entry.state, ItemState::Failed(FailureClass::Transient));
        assert_eq!(entry.last_error.unwrap().message, "timeout");
    }

    #[test]
    fn test_bind_destinations_is_fixed() {
        let (ledger, _temp) = create_test_ledger();
        let dests = vec!["rumble".to_string(), "bilibili".to_string()];

        ledger.bind_destinations("2000", &dests).unwrap();
        ledger.bind_destinations("2000", &dests).unwrap();

        let err = ledger
            .bind_destinations("2000", &["rumble".to_string()])
            .unwrap_err();
        assert!(matches!(err, LedgerError::DestinationsChanged { .. }));
        assert_eq!(ledger.partitions().unwrap(), vec!["2000".to_string()]);
    }

    #[test]
    fn test_watch_metadata_roundtrip() {
        let (ledger, _temp) = create_test_ledger();
        assert!(ledger.load_cursor("inbox").unwrap().is_none());

        ledger
            .save_cursor("inbox", &WatchCursor::new("00000000000000000042"))
            .unwrap();
        let cursor = ledger.load_cursor("inbox").unwrap().unwrap();
        assert_eq!(cursor.position, "00000000000000000042");
    }

    #[test]
    fn test_concurrent_upserts_on_distinct_keys() {
        let (ledger, _temp) = create_test_ledger();
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let key = LedgerKey::new("p", format!("item-{i}"), "d");
                    discover(&ledger, &key);
                    ledger.upsert(&key, Transition::BeginDownload).unwrap();
                    ledger
                        .upsert(
                            &key,
                            Transition::FinishDownload {
                                staged_path: PathBuf::from("/tmp/x"),
                                size: 1,
                                checksum: "c".to_string(),
                            },
                        )
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = ledger.list_by_partition("p").unwrap();
        assert_eq!(entries.len(), 8);
        assert!(entries.iter().all(|e| e.state == ItemState::Downloaded));
    }

    #[test]
    fn test_concurrent_upserts_on_same_key_are_serialized() {
        let (ledger, _temp) = create_test_ledger();
        let ledger = Arc::new(ledger);
        let key = LedgerKey::new("p", "i", "d");
        discover(&ledger, &key);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let key = key.clone();
                std::thread::spawn(move || ledger.upsert(&key, Transition::BeginDownload))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let entry = ledger.get(&key).unwrap().unwrap();
        assert_eq!(entry.download_attempts, 8);
    }
}

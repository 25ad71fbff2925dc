use super::cursor::{WatchCursor, WatchState};
use super::error::Result;
use super::state::{HistoryRecord, LedgerEntry, LedgerKey, Transition};

/// Durable per-(partition, item, destination) state store.
///
/// The trait is object-safe so workers, watchers and the status API can
/// share one `Arc<dyn Ledger>`. Watcher metadata lives in the same store.
pub trait Ledger: WatchStore {
    /// Current entry for a key, if any
    fn get(&self, key: &LedgerKey) -> Result<Option<LedgerEntry>>;

    /// Validate and apply one transition atomically.
    ///
    /// Upserts to different keys never block each other; upserts to the same
    /// key are serialized. Fails with `InvalidTransition` when the state
    /// machine does not permit the change.
    fn upsert(&self, key: &LedgerKey, transition: Transition) -> Result<LedgerEntry>;

    /// Consistent snapshot of every entry of one partition
    fn list_by_partition(&self, partition: &str) -> Result<Vec<LedgerEntry>>;

    /// Every partition that has been bound to a destination list
    fn partitions(&self) -> Result<Vec<String>>;

    /// Applied transitions of one key, oldest first
    fn history(&self, key: &LedgerKey) -> Result<Vec<HistoryRecord>>;

    /// Record the destination list of a partition on first use and refuse a
    /// different list afterwards.
    fn bind_destinations(&self, partition: &str, destinations: &[String]) -> Result<()>;
}

/// Persistence for watcher cursors and cycle reports
pub trait WatchStore: Send + Sync {
    fn load_cursor(&self, watcher: &str) -> Result<Option<WatchCursor>>;

    fn save_cursor(&self, watcher: &str, cursor: &WatchCursor) -> Result<()>;

    fn load_watch_state(&self, watcher: &str) -> Result<Option<WatchState>>;

    fn save_watch_state(&self, watcher: &str, state: &WatchState) -> Result<()>;
}

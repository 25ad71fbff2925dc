/// Fjall-based ledger of per-item transfer state
///
/// The ledger is the source of truth for deduplication and resumability. It
/// keeps one current entry per (partition, item, destination) key and uses
/// Fjall (an embedded LSM key-value store) to persist:
///
/// - Entries (current state, attempt counters, last error, item metadata)
/// - History (every applied transition, append-only, per key)
/// - Metadata (partition destination bindings, watcher cursors and reports)
///
/// ## State machine
///
/// `Discovered -> Downloading -> Downloaded -> Uploading -> Completed`, with
/// `Failed(class)` reachable from the two active states and `Abandoned`
/// reachable only from `Failed`. An operator may reset `Abandoned` back to
/// `Discovered`. See [`state::apply`] for the full transition table.
///
/// ## Usage
///
/// ```rust,ignore
/// use relaybox::ledger::{FjallLedger, Ledger, LedgerKey, Transition};
///
/// let ledger = FjallLedger::open("data/ledger")?;
/// let key = LedgerKey::new("1999", "vid-1", "rumble");
/// ledger.upsert(&key, Transition::Discover(item))?;
/// let entry = ledger.get(&key)?;
/// ```
pub mod cursor;
pub mod error;
pub mod keys;
pub mod state;
pub mod store;
mod traits;

pub use cursor::{WatchCursor, WatchState, WatchStatus};
pub use error::{LedgerError, Result};
pub use state::{ErrorRecord, HistoryRecord, ItemState, LedgerEntry, LedgerKey, Transition};
pub use store::FjallLedger;
pub use traits::{Ledger, WatchStore};

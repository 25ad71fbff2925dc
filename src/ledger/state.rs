//! Ledger entry types and the per-(item, destination) state machine.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{LedgerError, Result};
use crate::model::{FailureClass, ItemDescriptor, Phase};

/// Idempotency key of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerKey {
    pub partition: String,
    pub item: String,
    pub destination: String,
}

impl LedgerKey {
    pub fn new(
        partition: impl Into<String>,
        item: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            item: item.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.partition, self.item, self.destination)
    }
}

/// Processing state of one (partition, item, destination) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Discovered,
    Downloading,
    Downloaded,
    Uploading,
    Completed,
    Failed(FailureClass),
    Abandoned,
}

impl ItemState {
    /// `Completed` and `Abandoned` are never left automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Abandoned)
    }

    /// Stable label used for status counts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed(FailureClass::Transient) => "failed_transient",
            Self::Failed(FailureClass::Permanent) => "failed_permanent",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Last error recorded against an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub class: FailureClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Current state of one ledger key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub partition: String,
    pub item_id: String,
    pub destination: String,
    pub item_name: String,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub position: Option<String>,
    pub locator: Option<String>,
    pub state: ItemState,
    pub phase: Option<Phase>,
    /// Publish attempts against this destination
    pub attempts: u32,
    pub download_attempts: u32,
    pub last_error: Option<ErrorRecord>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub staged_path: Option<PathBuf>,
    pub reference: Option<String>,
}

impl LedgerEntry {
    fn discovered(key: &LedgerKey, item: ItemDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            partition: key.partition.clone(),
            item_id: key.item.clone(),
            destination: key.destination.clone(),
            item_name: item.name,
            size: item.size,
            checksum: None,
            position: item.position,
            locator: item.locator,
            state: ItemState::Discovered,
            phase: None,
            attempts: 0,
            download_attempts: 0,
            last_error: None,
            last_attempt_at: None,
            completed_at: None,
            discovered_at: now,
            updated_at: now,
            staged_path: None,
            reference: None,
        }
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(&self.partition, &self.item_id, &self.destination)
    }

    /// Rebuild the descriptor the entry was discovered from
    pub fn descriptor(&self) -> ItemDescriptor {
        ItemDescriptor {
            id: self.item_id.clone(),
            name: self.item_name.clone(),
            size: self.size,
            position: self.position.clone(),
            locator: self.locator.clone(),
        }
    }
}

/// A state change requested against one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Discover(ItemDescriptor),
    BeginDownload,
    FinishDownload {
        staged_path: PathBuf,
        size: u64,
        checksum: String,
    },
    BeginUpload,
    Complete {
        reference: String,
    },
    Fail {
        class: FailureClass,
        message: String,
    },
    Abandon,
    Reset,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover(_) => "discover",
            Self::BeginDownload => "begin_download",
            Self::FinishDownload { .. } => "finish_download",
            Self::BeginUpload => "begin_upload",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Abandon => "abandon",
            Self::Reset => "reset",
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::FinishDownload { checksum, .. } => Some(checksum.clone()),
            Self::Complete { reference } => Some(reference.clone()),
            Self::Fail { class, message } => Some(format!("{class}: {message}")),
            _ => None,
        }
    }
}

/// One appended line of per-key history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub at: DateTime<Utc>,
    pub transition: String,
    pub from: Option<ItemState>,
    pub to: ItemState,
    pub detail: Option<String>,
}

/// Result of applying a transition
#[derive(Debug, Clone)]
pub struct Applied {
    pub entry: LedgerEntry,
    /// `None` when the transition was a no-op (re-discovery of a known key)
    pub record: Option<HistoryRecord>,
}

/// Validate `transition` against `current` and compute the next entry.
pub fn apply(
    current: Option<&LedgerEntry>,
    key: &LedgerKey,
    transition: Transition,
    now: DateTime<Utc>,
) -> Result<Applied> {
    let transition_name = transition.name();
    let detail = transition.detail();

    let Some(current) = current else {
        return match transition {
            Transition::Discover(item) => {
                let entry = LedgerEntry::discovered(key, item, now);
                let record = HistoryRecord {
                    at: now,
                    transition: transition_name.to_string(),
                    from: None,
                    to: entry.state,
                    detail: None,
                };
                Ok(Applied {
                    entry,
                    record: Some(record),
                })
            }
            _ => Err(invalid(key, None, transition_name)),
        };
    };

    let mut next = current.clone();
    match (current.state, transition) {
        (_, Transition::Discover(_)) => {
            return Ok(Applied {
                entry: next,
                record: None,
            });
        }
        (
            ItemState::Discovered
            | ItemState::Downloading
            | ItemState::Downloaded
            | ItemState::Uploading
            | ItemState::Failed(FailureClass::Transient),
            Transition::BeginDownload,
        ) => {
            next.state = ItemState::Downloading;
            next.phase = Some(Phase::Download);
            next.download_attempts += 1;
            next.last_attempt_at = Some(now);
        }
        (
            ItemState::Downloading,
            Transition::FinishDownload {
                staged_path,
                size,
                checksum,
            },
        ) => {
            if let Some(recorded) = &current.checksum {
                if *recorded != checksum {
                    return Err(invalid(key, Some(current.state), transition_name));
                }
            }
            next.state = ItemState::Downloaded;
            next.staged_path = Some(staged_path);
            next.size = Some(size);
            next.checksum = Some(checksum);
        }
        (ItemState::Downloaded | ItemState::Uploading, Transition::BeginUpload) => {
            next.state = ItemState::Uploading;
            next.phase = Some(Phase::Upload);
            next.attempts += 1;
            next.last_attempt_at = Some(now);
        }
        (ItemState::Failed(FailureClass::Transient), Transition::BeginUpload)
            if current.phase == Some(Phase::Upload) =>
        {
            next.state = ItemState::Uploading;
            next.attempts += 1;
            next.last_attempt_at = Some(now);
        }
        (ItemState::Uploading, Transition::Complete { reference }) => {
            next.state = ItemState::Completed;
            next.reference = Some(reference);
            next.completed_at = Some(now);
        }
        (ItemState::Downloading | ItemState::Uploading, Transition::Fail { class, message }) => {
            next.state = ItemState::Failed(class);
            next.last_error = Some(ErrorRecord {
                class,
                message,
                at: now,
            });
        }
        (ItemState::Failed(_), Transition::Abandon) => {
            next.state = ItemState::Abandoned;
        }
        (ItemState::Abandoned, Transition::Reset) => {
            next.state = ItemState::Discovered;
            next.phase = None;
            next.attempts = 0;
            next.download_attempts = 0;
            next.staged_path = None;
        }
        (from, _) => return Err(invalid(key, Some(from), transition_name)),
    }

    next.updated_at = now;
    let record = HistoryRecord {
        at: now,
        transition: transition_name.to_string(),
        from: Some(current.state),
        to: next.state,
        detail,
    };
    Ok(Applied {
        entry: next,
        record: Some(record),
    })
}

fn invalid(key: &LedgerKey, from: Option<ItemState>, transition: &'static str) -> LedgerError {
    LedgerError::InvalidTransition {
        key: key.to_string(),
        from: from.map_or_else(|| "absent".to_string(), |s| s.to_string()),
        transition,
    }
}

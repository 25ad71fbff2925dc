//! Persisted watcher bookkeeping: the resume cursor and the last cycle report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last position a watcher has enumerated up to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchCursor {
    pub position: String,
    pub updated_at: DateTime<Utc>,
}

impl WatchCursor {
    pub fn new(position: impl Into<String>) -> Self {
        Self {
            position: position.into(),
            updated_at: Utc::now(),
        }
    }

    /// Move forward to the highest of the given positions; never moves back.
    pub fn advance<'a>(
        current: Option<&WatchCursor>,
        seen: impl IntoIterator<Item = &'a str>,
    ) -> Option<WatchCursor> {
        let best = seen.into_iter().max()?;
        match current {
            Some(cursor) if cursor.position.as_str() >= best => None,
            _ => Some(WatchCursor::new(best)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Checking,
    Idle,
    Error,
    Stopped,
}

/// Report of a watcher's most recent cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchState {
    pub cycle: u64,
    pub status: WatchStatus,
    pub monitor_only: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub new_found: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WatchState {
    pub fn starting(cycle: u64, monitor_only: bool) -> Self {
        Self {
            cycle,
            status: WatchStatus::Checking,
            monitor_only,
            last_check: None,
            new_found: 0,
            succeeded: 0,
            failed: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

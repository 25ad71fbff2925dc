//! Shared domain types: item descriptors, failure classes and pipeline phases.

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of content as reported by a source adapter.
///
/// `position` is an opaque, lexically sortable marker used by watcher
/// cursors (e.g. a zero-padded modification time). Sources that cannot
/// order their items leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct ItemDescriptor {
    #[builder(into)]
    pub id: String,
    #[builder(into)]
    pub name: String,
    pub size: Option<u64>,
    #[builder(into)]
    pub position: Option<String>,
    #[builder(into)]
    pub locator: Option<String>,
}

/// Classification of an adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network timeout, rate limit, 5xx-equivalent. Eligible for retry.
    Transient,
    /// Auth rejected, content rejected, not found. Never retried.
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active step an entry last entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Download,
    Upload,
}

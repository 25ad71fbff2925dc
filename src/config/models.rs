use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Default retry policy for sources and destinations without their own
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationConfig>,
    #[serde(default)]
    pub partitions: BTreeMap<String, PartitionConfig>,
    #[serde(default)]
    pub watchers: BTreeMap<String, WatcherConfig>,
    /// Loaded from environment, never from the config file
    #[serde(skip)]
    pub secrets: Secrets,
}

/// Engine-wide paths and limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// Upper bound on a single fetch or publish call
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
}

impl EngineConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            staging_dir: default_staging_dir(),
            adapter_timeout_secs: default_adapter_timeout_secs(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/staging")
}

fn default_adapter_timeout_secs() -> u64 {
    3600
}

/// Status API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Retry bounds as written in TOML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_secs() -> u64 {
    300
}

/// A named source adapter
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub kind: SourceKind,
    /// Overrides `[retry]` for downloads and enumeration
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Directory {
        root: PathBuf,
        #[serde(default)]
        extensions: Vec<String>,
        #[serde(default)]
        recursive: bool,
    },
    Http {
        #[serde(default)]
        items: Vec<HttpItemConfig>,
        #[serde(default = "default_connect_timeout_secs")]
        connect_timeout_secs: u64,
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
        user_agent: Option<String>,
    },
}

/// One URL of an `http` source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpItemConfig {
    pub url: String,
    pub id: Option<String>,
    pub name: Option<String>,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    3600
}

/// A named destination adapter
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationConfig {
    #[serde(flatten)]
    pub kind: DestinationKind,
    /// Overrides `[retry]` for publishes to this destination
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationKind {
    Memory {
        #[serde(default)]
        prefix: String,
    },
    Local {
        root: PathBuf,
        #[serde(default)]
        prefix: String,
    },
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        #[serde(default)]
        prefix: String,
    },
}

/// A partition: one source, a fixed ordered destination list
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionConfig {
    pub source: String,
    pub destinations: Vec<String>,
    /// Items processed at once
    #[serde(default = "default_partition_concurrency")]
    pub concurrency: usize,
}

fn default_partition_concurrency() -> usize {
    2
}

/// A mirror watcher bound to one (source, destination) pair
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    pub source: String,
    pub destination: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_watcher_concurrency")]
    pub concurrency: usize,
    /// Record new items without transferring them
    #[serde(default)]
    pub monitor_only: bool,
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_watcher_concurrency() -> usize {
    1
}

/// Credentials read from `S3_ACCESS_KEY`/`S3_SECRET_KEY` or the AWS-style names
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

//! Layered relaybox settings: struct defaults, then `config/relaybox.toml`
//! (or `$RELAYBOX_CONFIG`), then `RELAYBOX__<SECTION>__<KEY>` variables such
//! as `RELAYBOX__RETRY__MAX_ATTEMPTS=8`.
//!
//! ```no_run
//! use relaybox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! for (name, partition) in &config.partitions {
//!     println!("{name}: {} -> {:?}", partition.source, partition.destinations);
//! }
//! ```
//!
//! Credentials never come from the file; see [`Secrets`].

mod models;
mod sources;
mod validation;

pub use models::{
    Config, DestinationConfig, DestinationKind, EngineConfig, HttpItemConfig, PartitionConfig,
    RetryConfig, Secrets, ServerConfig, SourceConfig, SourceKind, WatcherConfig,
};
pub use sources::config_path;
pub use validation::{ValidationError, WATCH_PARTITION_PREFIX};

use std::path::PathBuf;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load from the default location and validate cross-references
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(config_path())
    }

    /// Same as [`Config::load`] with an explicit file, as given by `--config`
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Retry policy for a source, falling back to `[retry]`
    pub fn source_policy(&self, source: &str) -> RetryPolicy {
        self.sources
            .get(source)
            .and_then(|s| s.retry)
            .unwrap_or(self.retry)
            .policy()
    }

    /// Retry policy for a destination, falling back to `[retry]`
    pub fn destination_policy(&self, destination: &str) -> RetryPolicy {
        self.destinations
            .get(destination)
            .and_then(|d| d.retry)
            .unwrap_or(self.retry)
            .policy()
    }

    /// Ledger partition id used by a watcher
    pub fn watch_partition(name: &str) -> String {
        format!("{WATCH_PARTITION_PREFIX}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[engine]
ledger_path = "data/ledger"
staging_dir = "data/staging"
adapter_timeout_secs = 1800

[server]
bind_addr = "0.0.0.0:8080"

[retry]
max_attempts = 5
base_delay_ms = 2000
max_delay_secs = 300

[sources.playlist_1999]
kind = "http"
items = [
    { url = "https://media.example.org/1999/service-01.mp4", id = "svc-01" },
    { url = "https://media.example.org/1999/service-02.mp4" },
]

[sources.nas_inbox]
kind = "directory"
root = "/mnt/nas/inbox"
extensions = ["mp4", "mov", "mkv"]

[destinations.archive]
kind = "s3"
bucket = "media-archive"
region = "us-east-1"

[destinations.mirror]
kind = "local"
root = "/mnt/mirror"

[destinations.mirror.retry]
max_attempts = 10
max_delay_secs = 86400

[partitions.1999]
source = "playlist_1999"
destinations = ["archive", "mirror"]
concurrency = 4

[watchers.nas]
source = "nas_inbox"
destination = "mirror"
poll_interval_secs = 300
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();

        assert_eq!(config.partitions["1999"].destinations, vec!["archive", "mirror"]);
        assert_eq!(config.partitions["1999"].concurrency, 4);
        assert_eq!(config.watchers["nas"].poll_interval(), Duration::from_secs(300));
        assert!(!config.watchers["nas"].monitor_only);

        assert_eq!(config.destination_policy("archive"), RetryPolicy::default());
        let mirror = config.destination_policy("mirror");
        assert_eq!(mirror.max_attempts, 10);
        assert_eq!(mirror.max_delay, Duration::from_secs(86400));
        assert_eq!(config.source_policy("nas_inbox"), RetryPolicy::default());
    }

    #[test]
    fn test_validation_catches_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[destinations.archive]
kind = "memory"

[partitions.2001]
source = "nonexistent"
destinations = ["archive"]
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::UnknownSource { .. })
        ));
    }

    #[test]
    fn test_watch_partition_id() {
        assert_eq!(Config::watch_partition("nas"), "watch:nas");
    }
}

use super::models::{Config, DestinationKind, RetryConfig, SourceKind};
use std::collections::HashSet;
use thiserror::Error;

/// Partition ids with this prefix belong to watchers
pub const WATCH_PARTITION_PREFIX: &str = "watch:";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{owner} references non-existent source '{source_name}'")]
    UnknownSource { owner: String, source_name: String },

    #[error("{owner} references non-existent destination '{destination}'")]
    UnknownDestination { owner: String, destination: String },

    #[error("Partition '{partition}' has no destinations")]
    EmptyDestinations { partition: String },

    #[error("Partition '{partition}' lists destination '{destination}' more than once")]
    DuplicateDestination {
        partition: String,
        destination: String,
    },

    #[error("{owner}: concurrency must be positive")]
    ZeroConcurrency { owner: String },

    #[error("Watcher '{watcher}': poll_interval_secs must be positive")]
    ZeroPollInterval { watcher: String },

    #[error("{owner}: invalid retry policy ({reason})")]
    InvalidRetry { owner: String, reason: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("adapter_timeout_secs must be positive")]
    ZeroAdapterTimeout,

    #[error("Source '{source_name}' is an http source without items")]
    EmptyHttpSource { source_name: String },

    #[error("Destination '{destination}' uses S3 but the bucket name is empty")]
    MissingS3Bucket { destination: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_engine(config)?;
    validate_retry("[retry]", &config.retry)?;
    validate_sources(config)?;
    validate_destinations(config)?;
    validate_partitions(config)?;
    validate_watchers(config)?;
    Ok(())
}

fn validate_engine(config: &Config) -> Result<(), ValidationError> {
    if config.engine.adapter_timeout_secs == 0 {
        return Err(ValidationError::ZeroAdapterTimeout);
    }
    Ok(())
}

fn validate_retry(owner: &str, retry: &RetryConfig) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidRetry {
        owner: owner.to_string(),
        reason: reason.to_string(),
    };

    if retry.max_attempts == 0 {
        return Err(invalid("max_attempts must be at least 1"));
    }
    if retry.base_delay_ms > retry.max_delay_secs.saturating_mul(1000) {
        return Err(invalid("base_delay_ms exceeds max_delay_secs"));
    }
    Ok(())
}

/// Names become ledger key components and staging directory names
fn validate_name(name: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.contains(['\0', '/', '\\']) {
        return Err(invalid("must not contain NUL or path separators"));
    }
    if name == "." || name == ".." {
        return Err(invalid("must not be a relative path component"));
    }
    Ok(())
}

fn validate_sources(config: &Config) -> Result<(), ValidationError> {
    for (name, source) in &config.sources {
        validate_name(name)?;
        if let Some(retry) = &source.retry {
            validate_retry(&format!("Source '{name}'"), retry)?;
        }
        if let SourceKind::Http { items, .. } = &source.kind {
            if items.is_empty() {
                return Err(ValidationError::EmptyHttpSource {
                    source_name: name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_destinations(config: &Config) -> Result<(), ValidationError> {
    for (name, destination) in &config.destinations {
        validate_name(name)?;
        if let Some(retry) = &destination.retry {
            validate_retry(&format!("Destination '{name}'"), retry)?;
        }
        if let DestinationKind::S3 { bucket, .. } = &destination.kind {
            if bucket.trim().is_empty() {
                return Err(ValidationError::MissingS3Bucket {
                    destination: name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_partitions(config: &Config) -> Result<(), ValidationError> {
    for (id, partition) in &config.partitions {
        validate_name(id)?;
        if id.starts_with(WATCH_PARTITION_PREFIX) {
            return Err(ValidationError::InvalidName {
                name: id.clone(),
                reason: format!("the '{WATCH_PARTITION_PREFIX}' prefix is reserved for watchers"),
            });
        }

        let owner = format!("Partition '{id}'");
        if !config.sources.contains_key(&partition.source) {
            return Err(ValidationError::UnknownSource {
                owner,
                source_name: partition.source.clone(),
            });
        }
        if partition.destinations.is_empty() {
            return Err(ValidationError::EmptyDestinations {
                partition: id.clone(),
            });
        }

        let mut seen = HashSet::new();
        for destination in &partition.destinations {
            if !config.destinations.contains_key(destination) {
                return Err(ValidationError::UnknownDestination {
                    owner,
                    destination: destination.clone(),
                });
            }
            if !seen.insert(destination) {
                return Err(ValidationError::DuplicateDestination {
                    partition: id.clone(),
                    destination: destination.clone(),
                });
            }
        }

        if partition.concurrency == 0 {
            return Err(ValidationError::ZeroConcurrency { owner });
        }
    }
    Ok(())
}

fn validate_watchers(config: &Config) -> Result<(), ValidationError> {
    for (name, watcher) in &config.watchers {
        validate_name(name)?;
        let owner = format!("Watcher '{name}'");

        if !config.sources.contains_key(&watcher.source) {
            return Err(ValidationError::UnknownSource {
                owner,
                source_name: watcher.source.clone(),
            });
        }
        if !config.destinations.contains_key(&watcher.destination) {
            return Err(ValidationError::UnknownDestination {
                owner,
                destination: watcher.destination.clone(),
            });
        }
        if watcher.poll_interval_secs == 0 {
            return Err(ValidationError::ZeroPollInterval {
                watcher: name.clone(),
            });
        }
        if watcher.concurrency == 0 {
            return Err(ValidationError::ZeroConcurrency { owner });
        }
    }
    Ok(())
}

//! Configuration layers, lowest priority first: struct defaults, the TOML
//! file, `.env` (via dotenvy), then `RELAYBOX__<SECTION>__<KEY>` variables.

use super::models::{Config, Secrets};
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "RELAYBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/relaybox.toml";
const ENV_PREFIX: &str = "RELAYBOX";
const ENV_SEPARATOR: &str = "__";

/// Accepted variable names per secret, first match wins
const S3_ACCESS_KEY_VARS: &[&str] = &["S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];
const S3_SECRET_KEY_VARS: &[&str] = &["S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"];

/// `$RELAYBOX_CONFIG`, or `config/relaybox.toml`
pub fn config_path() -> PathBuf {
    env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Read `.env`, merge every layer and attach secrets from the environment
pub fn load(config_path: PathBuf) -> Result<Config, ConfigError> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let mut config = load_from_sources(config_path)?;
    config.secrets = secrets_from_env();
    Ok(config)
}

/// Merge the file and environment layers without touching `.env` or secrets
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    layered(&config_path).build()?.try_deserialize()
}

fn layered(config_path: &Path) -> ConfigBuilder<DefaultState> {
    let mut builder = config::Config::builder();

    if config_path.is_file() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).format(FileFormat::Toml));
    } else {
        tracing::warn!(
            "No configuration file at {}, running on defaults and environment",
            config_path.display()
        );
    }

    // RELAYBOX__ENGINE__STAGING_DIR -> engine.staging_dir
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    )
}

fn secrets_from_env() -> Secrets {
    Secrets {
        s3_access_key: first_var(S3_ACCESS_KEY_VARS),
        s3_secret_key: first_var(S3_SECRET_KEY_VARS),
    }
}

fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()))
}

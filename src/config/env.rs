//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `COURIER_CONFIG` - path to the config file
//! - `COURIER_SOURCE_USERNAME` / `COURIER_SOURCE_PASSWORD`
//! - `COURIER_DESTINATION_USERNAME` / `COURIER_DESTINATION_PASSWORD`
//! - `COURIER_SOURCE_URL` / `COURIER_DESTINATION_URL`
//! - `COURIER_DRY_RUN` - "true"/"1" forces dry-run mode

use std::env;

use crate::config::types::{Config, RelaySection};

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "COURIER";

/// Path to the config file, overridable via `COURIER_CONFIG`.
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "courier.conf".to_string())
}

/// Apply environment variable overrides to a config.
///
/// This allows sensitive values like passwords to be provided via
/// environment variables instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(url) = env::var(format!("{}_SOURCE_URL", ENV_PREFIX)) {
        config.source.url = url;
    }
    if let Ok(username) = env::var(format!("{}_SOURCE_USERNAME", ENV_PREFIX)) {
        config.source.username = username;
    }
    if let Ok(password) = env::var(format!("{}_SOURCE_PASSWORD", ENV_PREFIX)) {
        config.source.password = password;
    }

    if let Ok(url) = env::var(format!("{}_DESTINATION_URL", ENV_PREFIX)) {
        config.destination.url = url;
    }
    if let Ok(username) = env::var(format!("{}_DESTINATION_USERNAME", ENV_PREFIX)) {
        config.destination.username = username;
    }
    if let Ok(password) = env::var(format!("{}_DESTINATION_PASSWORD", ENV_PREFIX)) {
        config.destination.password = password;
    }

    if let Ok(dry_run) = env::var(format!("{}_DRY_RUN", ENV_PREFIX)) {
        let value = matches!(dry_run.to_lowercase().as_str(), "true" | "1" | "yes");
        config
            .relay
            .get_or_insert_with(RelaySection::default)
            .dry_run = Some(value);
    }

    config
}

//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.
//! Validation failures are fatal at startup.

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    for (label, endpoint) in [("source", &config.source), ("destination", &config.destination)] {
        if endpoint.url.is_empty() {
            errors.push(format!("{}.url is required", label));
        } else if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
            errors.push(format!(
                "{}.url must start with http:// or https:// (got '{}')",
                label, endpoint.url
            ));
        }
        if endpoint.username.is_empty() {
            errors.push(format!("{}.username is required", label));
        }
        if endpoint.password.is_empty() {
            errors.push(format!("{}.password is required", label));
        }
    }

    if config.channels.is_empty() {
        errors.push("channels must list at least one source/destination mapping".to_string());
    }
    for (i, mapping) in config.channels.iter().enumerate() {
        if mapping.source.is_empty() {
            errors.push(format!("channels[{}].source is required", i));
        }
        if mapping.destination.is_empty() {
            errors.push(format!("channels[{}].destination is required", i));
        }
    }

    if let Some(ref relay) = config.relay {
        if let Some(ref domains) = relay.excluded_domains {
            for (i, domain) in domains.iter().enumerate() {
                if !domain.starts_with('@') {
                    errors.push(format!(
                        "relay.excluded_domains[{}] must start with '@' (got '{}')",
                        i, domain
                    ));
                }
            }
        }
        if relay.forwarded_capacity == Some(0) {
            errors.push("relay.forwarded_capacity must be non-zero".to_string());
        }
    }

    if let Some(ref catchup) = config.catchup {
        if catchup.max_messages == Some(0) {
            errors.push("catchup.max_messages must be non-zero".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("; "),
        })
    }
}

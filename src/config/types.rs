//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: EndpointConfig,
    pub destination: EndpointConfig,
    pub channels: Vec<ChannelMapping>,
    pub relay: Option<RelaySection>,
    pub catchup: Option<CatchupSection>,
    pub filters: Option<FiltersConfig>,
}

/// Connection settings for one messaging server endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Base REST URL, e.g. "https://chat.example.com".
    pub url: String,
    /// WebSocket URL. Derived from `url` when absent.
    pub ws_url: Option<String>,
    pub username: String,
    pub password: String,
}

/// Maps a monitored source channel to a destination channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMapping {
    /// Source channel identifier.
    pub source: String,
    /// Destination channel identifier.
    pub destination: String,
}

/// Relay behavior settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelaySection {
    /// Log forwarding decisions without touching the destination.
    pub dry_run: Option<bool>,
    /// Author email domain suffixes that must never be forwarded,
    /// e.g. ["@corp.com"].
    pub excluded_domains: Option<Vec<String>>,
    /// Path for the watermark document. Defaults to "courier-watermarks.json".
    pub watermark_file: Option<String>,
    /// Capacity of the source->destination message id map.
    pub forwarded_capacity: Option<usize>,
    /// Seconds between status snapshot log lines.
    pub status_interval_secs: Option<u64>,
}

/// Catch-up replay settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatchupSection {
    /// Lookback window for channels with no watermark yet (hours).
    pub max_lookback_hours: Option<u64>,
    /// Maximum messages fetched per channel.
    pub max_messages: Option<u32>,
    /// Delay between replayed messages (milliseconds).
    pub message_delay_ms: Option<u64>,
    /// Delay between channels (milliseconds).
    pub channel_delay_ms: Option<u64>,
}

/// Message content filtering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FiltersConfig {
    pub enabled: Option<bool>,
    /// Regex patterns; a matching message is excluded from forwarding.
    pub patterns: Option<Vec<String>>,
}

/// Resolved relay options with defaults applied.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub dry_run: bool,
    pub excluded_domains: Vec<String>,
    pub forwarded_capacity: usize,
    pub status_interval: Duration,
}

/// Resolved catch-up options with defaults applied.
#[derive(Debug, Clone)]
pub struct CatchupOptions {
    pub max_lookback: Duration,
    pub max_messages: u32,
    pub message_delay: Duration,
    pub channel_delay: Duration,
}

impl Config {
    pub fn relay_options(&self) -> RelayOptions {
        let section = self.relay.clone().unwrap_or_default();
        RelayOptions {
            dry_run: section.dry_run.unwrap_or(false),
            excluded_domains: section
                .excluded_domains
                .unwrap_or_default()
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
            forwarded_capacity: section.forwarded_capacity.unwrap_or(512),
            status_interval: Duration::from_secs(section.status_interval_secs.unwrap_or(60)),
        }
    }

    pub fn catchup_options(&self) -> CatchupOptions {
        let section = self.catchup.clone().unwrap_or_default();
        CatchupOptions {
            max_lookback: Duration::from_secs(section.max_lookback_hours.unwrap_or(24) * 3600),
            max_messages: section.max_messages.unwrap_or(200),
            message_delay: Duration::from_millis(section.message_delay_ms.unwrap_or(250)),
            channel_delay: Duration::from_millis(section.channel_delay_ms.unwrap_or(1000)),
        }
    }

    pub fn watermark_file(&self) -> String {
        self.relay
            .as_ref()
            .and_then(|r| r.watermark_file.clone())
            .unwrap_or_else(|| "courier-watermarks.json".to_string())
    }
}

impl EndpointConfig {
    /// WebSocket URL for the event stream, derived from the REST URL
    /// when not configured explicitly.
    pub fn websocket_url(&self) -> String {
        if let Some(ref ws) = self.ws_url {
            return ws.clone();
        }
        let base = self
            .url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/api/v4/websocket", base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config {
            source: EndpointConfig {
                url: "https://src.example.com".to_string(),
                ws_url: None,
                username: "relay".to_string(),
                password: "secret".to_string(),
            },
            destination: EndpointConfig {
                url: "https://dst.example.com".to_string(),
                ws_url: None,
                username: "relay".to_string(),
                password: "secret".to_string(),
            },
            channels: vec![ChannelMapping {
                source: "chan-a".to_string(),
                destination: "chan-b".to_string(),
            }],
            relay: None,
            catchup: None,
            filters: None,
        }
    }

    #[test]
    fn test_relay_defaults() {
        let opts = minimal_config().relay_options();
        assert!(!opts.dry_run);
        assert!(opts.excluded_domains.is_empty());
        assert_eq!(opts.forwarded_capacity, 512);
        assert_eq!(opts.status_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_catchup_defaults() {
        let opts = minimal_config().catchup_options();
        assert_eq!(opts.max_lookback, Duration::from_secs(24 * 3600));
        assert_eq!(opts.max_messages, 200);
    }

    #[test]
    fn test_excluded_domains_lowercased() {
        let mut config = minimal_config();
        config.relay = Some(RelaySection {
            excluded_domains: Some(vec!["@Corp.COM".to_string()]),
            ..RelaySection::default()
        });
        assert_eq!(config.relay_options().excluded_domains, vec!["@corp.com"]);
    }

    #[test]
    fn test_websocket_url_derivation() {
        let endpoint = EndpointConfig {
            url: "https://chat.example.com/".to_string(),
            ws_url: None,
            username: String::new(),
            password: String::new(),
        };
        assert_eq!(
            endpoint.websocket_url(),
            "wss://chat.example.com/api/v4/websocket"
        );

        let explicit = EndpointConfig {
            ws_url: Some("wss://other.example.com/ws".to_string()),
            ..endpoint
        };
        assert_eq!(explicit.websocket_url(), "wss://other.example.com/ws");
    }
}

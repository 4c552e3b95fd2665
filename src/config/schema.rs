//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::Timeouts;

/// Root configuration for a managed service.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Per-connection and drain timeouts.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Lifecycle behavior.
    pub lifecycle: LifecycleConfig,

    /// Geolocation lookups used by the demo service.
    pub ipinfo: IpInfoConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (`host:port`, or `:port` for every interface).
    pub address: String,

    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: ":8000".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Timeout configuration in seconds. Zero selects the built-in default.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle keep-alive connection lifetime.
    pub idle_secs: u64,

    /// Time allowed to read a full request.
    pub read_secs: u64,

    /// Time allowed to produce and write a response.
    pub write_secs: u64,

    /// Grace period for in-flight requests on shutdown.
    pub drain_secs: u64,
}

impl TimeoutConfig {
    pub fn to_timeouts(&self) -> Timeouts {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        Timeouts {
            idle: secs(self.idle_secs),
            read: secs(self.read_secs),
            write: secs(self.write_secs),
            drain: secs(self.drain_secs),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Treat an accept-loop fault as a shutdown trigger.
    pub stop_on_serve_fault: bool,
}

/// Geolocation client configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct IpInfoConfig {
    /// Service endpoint.
    pub base_url: String,

    /// Optional bearer token.
    pub token: Option<String>,

    /// Optional User-Agent override.
    pub agent: Option<String>,
}

impl Default for IpInfoConfig {
    fn default() -> Self {
        Self {
            base_url: crate::ipinfo::DEFAULT_BASE_URL.to_string(),
            token: None,
            agent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.listener.address, ":8000");
        assert_eq!(config.observability.log_level, "info");
        assert!(!config.lifecycle.stop_on_serve_fault);
    }

    #[test]
    fn zero_seconds_means_default() {
        let timeouts = TimeoutConfig {
            idle_secs: 0,
            read_secs: 5,
            write_secs: 0,
            drain_secs: 30,
        }
        .to_timeouts();
        assert_eq!(timeouts.idle, None);
        assert_eq!(timeouts.read, Some(Duration::from_secs(5)));
        assert_eq!(timeouts.drain, Some(Duration::from_secs(30)));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [listener]
            address = "127.0.0.1:9000"

            [timeouts]
            drain_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.address, "127.0.0.1:9000");
        assert_eq!(config.listener.max_body_bytes, 2 * 1024 * 1024);
        assert_eq!(config.timeouts.drain_secs, 2);
        assert_eq!(config.timeouts.idle_secs, 0);
    }
}

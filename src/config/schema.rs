//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files; every
//! section defaults so a partial (or empty) file is valid.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::observability::logging::Severity;

/// Default port for both address families.
pub const DEFAULT_PORT: u16 = 8080;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Per-family listener settings.
    pub listeners: ListenersConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Socket timeouts.
    pub timeouts: TimeoutConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Log threshold and sink.
    pub logging: LoggingConfig,

    /// Document root served to clients.
    pub target: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: ListenersConfig::default(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
            target: PathBuf::from("."),
        }
    }
}

/// Listener configuration for both address families.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenersConfig {
    #[serde(deserialize_with = "ipv4_listener")]
    pub ipv4: ListenerConfig,
    #[serde(deserialize_with = "ipv6_listener")]
    pub ipv6: ListenerConfig,

    /// Listen backlog (pending, not yet accepted connections).
    pub backlog: u32,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,
}

impl Default for ListenersConfig {
    fn default() -> Self {
        Self {
            ipv4: ListenerConfig::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            ipv6: ListenerConfig::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
            backlog: 16,
            max_connections: 1024,
        }
    }
}

/// One address family's listener.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Whether this family is served at all.
    pub enabled: bool,

    /// Source address to bind.
    pub address: IpAddr,

    /// Port to bind.
    pub port: u16,
}

impl ListenerConfig {
    pub fn new(address: IpAddr) -> Self {
        Self {
            enabled: true,
            address,
            port: DEFAULT_PORT,
        }
    }
}

/// A listener section as written in a file; every key is optional.
#[derive(Deserialize)]
struct ListenerSection {
    #[serde(default = "default_enabled")]
    enabled: bool,
    address: Option<IpAddr>,
    #[serde(default = "default_port")]
    port: u16,
}

impl ListenerSection {
    fn into_config(self, unspecified: IpAddr) -> ListenerConfig {
        ListenerConfig {
            enabled: self.enabled,
            address: self.address.unwrap_or(unspecified),
            port: self.port,
        }
    }
}

fn ipv4_listener<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ListenerConfig, D::Error> {
    let section = ListenerSection::deserialize(deserializer)?;
    Ok(section.into_config(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
}

fn ipv6_listener<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ListenerConfig, D::Error> {
    let section = ListenerSection::deserialize(deserializer)?;
    Ok(section.into_config(IpAddr::V6(Ipv6Addr::UNSPECIFIED)))
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Bounds on what a single request may occupy in memory.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Capacity of the header buffer (request line + header fields + blank line).
    pub max_header_bytes: usize,

    /// Longest accepted request target.
    pub max_target_len: usize,

    /// Most header fields in one request.
    pub max_header_count: usize,

    /// Longest single header line.
    pub max_header_field_len: usize,

    /// Largest accepted body.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 4096,
            max_target_len: 2048,
            max_header_count: 64,
            max_header_field_len: 1024,
            max_body_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Longest wait for the next bytes from a client, in seconds.
    pub idle_read_secs: u64,

    /// Longest time allowed to write a response, in seconds.
    pub write_secs: u64,
}

impl TimeoutConfig {
    pub fn idle_read(&self) -> Duration {
        Duration::from_secs(self.idle_read_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_read_secs: 10,
            write_secs: 10,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Maximum number of cached responses before LRU eviction.
    pub capacity: usize,

    /// Entry lifetime in seconds; 0 keeps entries until evicted.
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
            ttl_secs: 60,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Most verbose severity still written (0 = EMERG ... 7 = DEBUG).
    pub level: Severity,

    /// Append log lines to this file instead of stderr.
    pub output: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Severity::Warn,
            output: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serve_both_families_on_8080() {
        let config = ServerConfig::default();
        assert!(config.listeners.ipv4.enabled);
        assert!(config.listeners.ipv6.enabled);
        assert_eq!(config.listeners.ipv4.port, 8080);
        assert_eq!(config.listeners.ipv6.address, IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert_eq!(config.limits.max_header_bytes, 4096);
        assert_eq!(config.logging.level, Severity::Warn);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            target = "/srv/www"

            [listeners.ipv4]
            address = "127.0.0.1"
            port = 9000

            [cache]
            ttl_secs = 0

            [logging]
            level = "DEBUG"
            "#,
        )
        .unwrap();

        assert_eq!(config.target, PathBuf::from("/srv/www"));
        assert_eq!(config.listeners.ipv4.port, 9000);
        assert!(config.listeners.ipv4.enabled);
        assert_eq!(config.listeners.ipv6.port, 8080);
        assert_eq!(config.cache.ttl(), None);
        assert_eq!(config.cache.capacity, 1024);
        assert_eq!(config.logging.level, Severity::Debug);
    }

    #[test]
    fn listener_section_without_address_keeps_family_default() {
        let config: ServerConfig = toml::from_str(
            "[listeners.ipv4]\nport = 7000\n\n[listeners.ipv6]\nenabled = false\n",
        )
        .unwrap();

        assert_eq!(config.listeners.ipv4.port, 7000);
        assert_eq!(config.listeners.ipv4.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(!config.listeners.ipv6.enabled);
        assert_eq!(config.listeners.ipv6.address, IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert_eq!(config.listeners.ipv6.port, 8080);
    }

    #[test]
    fn numeric_log_level() {
        let config: LoggingConfig = toml::from_str("level = 2").unwrap();
        assert_eq!(config.level, Severity::Crit);
    }
}

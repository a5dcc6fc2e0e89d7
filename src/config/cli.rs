//! Command-line flags.
//!
//! Flags override whatever the optional `--config` file sets; the result is
//! validated once and then frozen.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{parse_config, resolve_log_output, resolve_target, ConfigError};
use crate::config::schema::ServerConfig;
use crate::config::validation::validate_config;
use crate::observability::logging::Severity;

/// A minimal dual-stack HTTP/1.x static file server.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "wsfs", version, about)]
pub struct Cli {
    /// IPv4 address to listen on
    #[arg(long, value_name = "ADDR")]
    pub source4: Option<Ipv4Addr>,

    /// IPv6 address to listen on
    #[arg(long, value_name = "ADDR")]
    pub source6: Option<Ipv6Addr>,

    /// IPv4 port [default: 8080]
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub port4: Option<u16>,

    /// IPv6 port [default: 8080]
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub port6: Option<u16>,

    /// Serve IPv4 only
    #[arg(long, conflicts_with = "only6")]
    pub only4: bool,

    /// Serve IPv6 only
    #[arg(long)]
    pub only6: bool,

    /// 0-7 or EMERG|ALERT|CRIT|ERROR|WARN|NOTICE|INFO|DEBUG [default: WARN]
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<Severity>,

    /// Append log lines to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_output: Option<PathBuf>,

    /// Directory to serve [default: .]
    #[arg(long, value_name = "PATH")]
    pub target: Option<PathBuf>,

    /// TOML configuration file; flags take precedence
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Apply the flags on top of `config`.
    pub fn apply(&self, config: &mut ServerConfig) {
        let listeners = &mut config.listeners;
        if let Some(addr) = self.source4 {
            listeners.ipv4.address = IpAddr::V4(addr);
        }
        if let Some(addr) = self.source6 {
            listeners.ipv6.address = IpAddr::V6(addr);
        }
        if let Some(port) = self.port4 {
            listeners.ipv4.port = port;
        }
        if let Some(port) = self.port6 {
            listeners.ipv6.port = port;
        }
        if self.only4 {
            listeners.ipv4.enabled = true;
            listeners.ipv6.enabled = false;
        }
        if self.only6 {
            listeners.ipv6.enabled = true;
            listeners.ipv4.enabled = false;
        }

        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(output) = &self.log_output {
            config.logging.output = Some(output.clone());
        }
        if let Some(target) = &self.target {
            config.target = target.clone();
        }
    }

    /// Build the final configuration: file (if any), then flags, then path
    /// resolution and validation.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => parse_config(path)?,
            None => ServerConfig::default(),
        };
        self.apply(&mut config);

        config.target = resolve_target(&config.target)?;
        if let Some(output) = &config.logging.output {
            config.logging.output = Some(resolve_log_output(output)?);
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

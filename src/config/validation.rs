//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, limits, timeouts, cache size)
//! - Check each listener's address belongs to its family
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs after CLI overrides, before config is accepted into the system

use std::fmt;

use crate::config::schema::{ListenerConfig, ServerConfig};

/// One rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `listeners.ipv4.port`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check `config` for values the server cannot run with.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listeners = &config.listeners;
    if !listeners.ipv4.enabled && !listeners.ipv6.enabled {
        errors.push(ValidationError::new("listeners", "at least one address family must be enabled"));
    }
    check_listener(&listeners.ipv4, "listeners.ipv4.port", "listeners.ipv4.address", false, &mut errors);
    check_listener(&listeners.ipv6, "listeners.ipv6.port", "listeners.ipv6.address", true, &mut errors);
    if listeners.backlog == 0 {
        errors.push(ValidationError::new("listeners.backlog", "must be greater than 0"));
    }
    if listeners.max_connections == 0 {
        errors.push(ValidationError::new("listeners.max_connections", "must be greater than 0"));
    }

    let limits = &config.limits;
    let nonzero = [
        ("limits.max_header_bytes", limits.max_header_bytes),
        ("limits.max_target_len", limits.max_target_len),
        ("limits.max_header_count", limits.max_header_count),
        ("limits.max_header_field_len", limits.max_header_field_len),
    ];
    for (field, value) in nonzero {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if limits.max_target_len > limits.max_header_bytes {
        errors.push(ValidationError::new(
            "limits.max_target_len",
            format!(
                "{} exceeds limits.max_header_bytes ({})",
                limits.max_target_len, limits.max_header_bytes
            ),
        ));
    }

    if config.timeouts.idle_read_secs == 0 {
        errors.push(ValidationError::new("timeouts.idle_read_secs", "must be greater than 0"));
    }
    if config.timeouts.write_secs == 0 {
        errors.push(ValidationError::new("timeouts.write_secs", "must be greater than 0"));
    }

    if config.cache.enabled && config.cache.capacity == 0 {
        errors.push(ValidationError::new(
            "cache.capacity",
            "must be greater than 0 when the cache is enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_listener(
    listener: &ListenerConfig,
    port_field: &'static str,
    address_field: &'static str,
    ipv6: bool,
    errors: &mut Vec<ValidationError>,
) {
    if !listener.enabled {
        return;
    }
    if listener.port == 0 {
        errors.push(ValidationError::new(port_field, "must be between 1 and 65535"));
    }
    if listener.address.is_ipv6() != ipv6 {
        let family = if ipv6 { "IPv6" } else { "IPv4" };
        errors.push(ValidationError::new(
            address_field,
            format!("{} is not an {} address", listener.address, family),
        ));
    }
}

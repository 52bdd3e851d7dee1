//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::uri::Authority;

use crate::config::schema::ProxyConfig;

/// Longest delay accepted, in milliseconds.
pub const MAX_DELAY_MS: u64 = 60 * 60 * 1000;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("delay.millis {0} exceeds maximum of {max}", max = MAX_DELAY_MS)]
    DelayTooLong(u64),
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_addr(&mut errors, "upstream.bind_address", &config.upstream.bind_address);
    if config.target.address.parse::<Authority>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "target.address",
            value: config.target.address.clone(),
        });
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_connections" });
    }
    if config.upstream.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "upstream.max_connections" });
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.connect_ms" });
    }
    if config.timeouts.response_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.response_secs" });
    }
    if config.delay.millis > MAX_DELAY_MS {
        errors.push(ValidationError::DelayTooLong(config.delay.millis));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the delay proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Built-in upstream target service (the echo server).
    pub upstream: UpstreamConfig,

    /// Fixed forward target every proxied request is sent to.
    pub target: TargetConfig,

    /// Artificial delay applied before each forward.
    pub delay: DelayConfig,

    /// Timeout configuration for the upstream leg.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8008").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8008".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream target service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Start the echo service alongside the proxy.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:9008").
    pub bind_address: String,

    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:9008".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Forward target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Upstream `host:port` that receives every forwarded request.
    pub address: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9008".to_string(),
        }
    }
}

/// Delay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Delay before each forward, in milliseconds.
    pub millis: u64,
    /// Request body bytes read ahead while a forward waits on its delay.
    /// Reading the body is what lets a client disconnect be noticed; past
    /// this limit the body stays on the socket until dispatch.
    pub max_buffered_bytes: usize,
}

impl DelayConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.millis)
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            millis: 250,
            max_buffered_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect timeout towards the target, in milliseconds.
    pub connect_ms: u64,

    /// Time allowed for the target to produce a response head, in seconds.
    pub response_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn response(&self) -> Duration {
        Duration::from_secs(self.response_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            response_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub log_filter: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Address for the Prometheus scrape endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "delay_proxy=info,tower_http=info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

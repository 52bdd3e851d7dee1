//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)            CLI flags / environment
//!     → loader.rs (parse)           │
//!     → validation.rs ◀─────────────┘ (overrides applied, re-validated)
//!     → ProxyConfig (validated, immutable)
//!     → handed by value to ProxyServer / EchoServer
//! ```
//!
//! # Design Decisions
//! - Config is immutable for the process lifetime; no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    DelayConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, TargetConfig, TimeoutConfig,
    UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};

//! Delaying forward proxy (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────────┐
//!                   │                     DELAY PROXY                       │
//!                   │                                                       │
//!  Client Request   │  ┌─────────┐   ┌─────────┐   ┌──────────────────┐    │
//!  ─────────────────┼─▶│   net   │──▶│  http   │──▶│      delay       │    │
//!     :8008         │  │listener │   │ server  │   │ scheduler (heap) │    │
//!                   │  └─────────┘   └─────────┘   └────────┬─────────┘    │
//!                   │                                        │ fired        │
//!                   │                                        ▼              │
//!  Client Response  │                              ┌──────────────────┐    │
//!  ◀────────────────┼──────── streamed ────────────│     forward      │────┼──▶ Upstream
//!                   │                              │    dispatcher    │◀───┼─── :9008 (echo)
//!                   │                              └──────────────────┘    │
//!                   └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use delay_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use delay_proxy::lifecycle::{signals, startup};
use delay_proxy::observability::{logging, metrics};
use delay_proxy::Shutdown;

#[derive(Parser)]
#[command(name = "delay-proxy")]
#[command(about = "HTTP forward proxy that delays every request before relaying it", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "DELAY_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Proxy listen address
    #[arg(long, env = "DELAY_PROXY_LISTEN")]
    listen: Option<String>,

    /// Upstream echo service listen address
    #[arg(long, env = "DELAY_PROXY_UPSTREAM_LISTEN")]
    upstream_listen: Option<String>,

    /// Forward target host:port
    #[arg(long, env = "DELAY_PROXY_TARGET")]
    target: Option<String>,

    /// Delay before each forward, in milliseconds
    #[arg(long, env = "DELAY_PROXY_DELAY_MS")]
    delay_ms: Option<u64>,

    /// Do not start the built-in upstream echo service
    #[arg(long)]
    no_upstream: bool,
}

impl Cli {
    fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        if let Some(upstream_listen) = self.upstream_listen {
            config.upstream.bind_address = upstream_listen;
        }
        if let Some(target) = self.target {
            config.target.address = target;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.delay.millis = delay_ms;
        }
        if self.no_upstream {
            config.upstream.enabled = false;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    logging::init_logging(&config.observability.log_filter);
    tracing::info!("delay-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        listen = %config.listener.bind_address,
        upstream_listen = %config.upstream.bind_address,
        upstream_enabled = config.upstream.enabled,
        target = %config.target.address,
        delay_ms = config.delay.millis,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server = startup::run(config, &shutdown);
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = signals::wait_for_signal() => {
            shutdown.trigger();
            server.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

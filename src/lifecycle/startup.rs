//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind the upstream echo listener first, then the proxy listener
//! - Construct both servers explicitly and run them side by side
//! - Stop both when the shutdown coordinator fires
//!
//! # Design Decisions
//! - Fail fast: any bind or target error is fatal at startup
//! - No globals: servers are owned values passed into `serve`

use crate::config::ProxyConfig;
use crate::forward::ForwardError;
use crate::http::{EchoServer, ProxyServer};
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};

/// Error that prevents the servers from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Bind everything described by `config` and serve until shutdown.
pub async fn run(config: ProxyConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    let echo = if config.upstream.enabled {
        let listener =
            Listener::bind(&config.upstream.bind_address, config.upstream.max_connections).await?;
        Some((EchoServer::new(config.upstream.clone()), listener))
    } else {
        tracing::info!("Upstream echo service disabled");
        None
    };

    let proxy_listener =
        Listener::bind(&config.listener.bind_address, config.listener.max_connections).await?;
    let proxy = ProxyServer::new(config)?;

    serve((proxy, proxy_listener), echo, shutdown).await
}

/// Run an already constructed proxy (and optional echo service).
pub async fn serve(
    (proxy, proxy_listener): (ProxyServer, Listener),
    echo: Option<(EchoServer, Listener)>,
    shutdown: &Shutdown,
) -> Result<(), StartupError> {
    let echo_task = echo.map(|(server, listener)| {
        let signal = shutdown.subscribe();
        tokio::spawn(async move { server.run(listener, signal).await })
    });

    let proxy_result = proxy.run(proxy_listener, shutdown.subscribe()).await;

    if let Some(task) = echo_task {
        // The proxy may have stopped on its own; make sure the echo side follows.
        shutdown.trigger();
        task.await??;
    }

    proxy_result?;
    Ok(())
}

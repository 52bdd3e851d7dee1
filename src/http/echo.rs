//! Upstream target service.
//!
//! Answers every request, whatever the method or path, with `200 OK` and a
//! body naming the received request target followed by the received headers
//! as indented JSON.

use axum::{
    body::Body,
    http::{Request, StatusCode, Uri},
    response::IntoResponse,
    routing::any,
    Router,
};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::UpstreamConfig;
use crate::http::headers::HeaderMultiMap;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;

/// First line prefix of every echo body.
pub const ECHO_PREFIX: &str = "Request successfully proxied to: ";

/// Largest request body drained before answering.
const MAX_DRAIN_BYTES: usize = 16 * 1024 * 1024;

/// Render the echo body for a request target and its headers.
pub fn render_echo(target: &str, headers: &HeaderMultiMap) -> String {
    format!("{ECHO_PREFIX}{target}\n{}", headers.to_pretty_json())
}

/// The request target as the client wrote it.
fn request_target(uri: &Uri) -> String {
    if uri.scheme().is_some() {
        return uri.to_string();
    }
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.to_string())
}

async fn echo_handler(request: Request<Body>) -> impl IntoResponse {
    let (parts, body) = request.into_parts();
    let target = request_target(&parts.uri);
    let headers = HeaderMultiMap::from(&parts.headers);

    // Drain the body so the connection can be reused.
    let received = axum::body::to_bytes(body, MAX_DRAIN_BYTES)
        .await
        .map(|bytes| bytes.len())
        .unwrap_or(0);

    tracing::debug!(
        method = %parts.method,
        target = %target,
        headers = headers.len(),
        body_bytes = received,
        "Echoing request"
    );
    metrics::record_echo();

    (StatusCode::OK, render_echo(&target, &headers))
}

/// The upstream echo server.
pub struct EchoServer {
    router: Router,
    config: UpstreamConfig,
    connections: ConnectionTracker,
}

impl EchoServer {
    pub fn new(config: UpstreamConfig) -> Self {
        let router = Router::new()
            .route("/{*path}", any(echo_handler))
            .route("/", any(echo_handler))
            .fallback(echo_handler)
            .layer(TraceLayer::new_for_http());

        Self {
            router,
            config,
            connections: ConnectionTracker::for_service("echo"),
        }
    }

    /// The router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Counters for connections accepted by [`EchoServer::run`].
    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: Listener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        tracing::info!(address = ?listener.local_addr().ok(), "Upstream echo service starting");
        listener.serve(self.router, self.connections, shutdown).await?;
        tracing::info!("Upstream echo service stopped");
        Ok(())
    }
}

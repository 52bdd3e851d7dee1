//! Listening proxy.
//!
//! # Responsibilities
//! - Create the Axum Router with the proxy handler
//! - Parse each request into an `InboundRequest`
//! - Register a `PendingForward` with the delay scheduler
//! - Dispatch to the forwarding dispatcher once the delay fires
//!
//! Each connection is served on its own task by the listener, so a request
//! waiting on its delay never holds up another connection.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::delay::{DelayScheduler, NotDispatched, PendingForward};
use crate::forward::{ForwardError, Forwarder, HyperUpstream, UpstreamClient, UpstreamTarget};
use crate::http::request::InboundRequest;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;

/// Application state injected into handlers.
pub struct ProxyState<C> {
    pub scheduler: DelayScheduler,
    pub forwarder: Arc<Forwarder<C>>,
    pub delay: Duration,
    pub read_ahead: usize,
}

impl<C> Clone for ProxyState<C> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            forwarder: Arc::clone(&self.forwarder),
            delay: self.delay,
            read_ahead: self.read_ahead,
        }
    }
}

/// HTTP server for the delaying proxy.
pub struct ProxyServer {
    router: Router,
    config: ProxyConfig,
    scheduler: DelayScheduler,
    connections: ConnectionTracker,
}

impl ProxyServer {
    /// Create a proxy forwarding through a pooled hyper client.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: ProxyConfig) -> Result<Self, ForwardError> {
        let client = HyperUpstream::new(config.timeouts.connect());
        Self::with_client(config, client)
    }

    /// Create a proxy forwarding through `client`.
    pub fn with_client<C: UpstreamClient>(config: ProxyConfig, client: C) -> Result<Self, ForwardError> {
        let target = UpstreamTarget::parse(&config.target.address)?;
        let scheduler = DelayScheduler::new();

        let state = ProxyState {
            scheduler: scheduler.clone(),
            forwarder: Arc::new(Forwarder::new(client, target, config.timeouts.response())),
            delay: config.delay.duration(),
            read_ahead: config.delay.max_buffered_bytes,
        };

        Ok(Self {
            router: Self::build_router(state),
            config,
            scheduler,
            connections: ConnectionTracker::for_service("proxy"),
        })
    }

    fn build_router<C: UpstreamClient>(state: ProxyState<C>) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler::<C>))
            .route("/", any(proxy_handler::<C>))
            .fallback(proxy_handler::<C>)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// The scheduler holding pending forwards.
    pub fn scheduler(&self) -> &DelayScheduler {
        &self.scheduler
    }

    /// Counters for connections accepted by [`ProxyServer::run`].
    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: Listener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        tracing::info!(
            address = ?listener.local_addr().ok(),
            target = %self.config.target.address,
            delay_ms = self.config.delay.millis,
            "Proxy server starting"
        );

        listener.serve(self.router, self.connections, shutdown).await?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Delay, then forward. One call per inbound request.
async fn proxy_handler<C: UpstreamClient>(
    State(state): State<ProxyState<C>>,
    request: Request<Body>,
) -> Response {
    let inbound = match InboundRequest::from_http(request) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting request");
            metrics::record_protocol_error();
            return e.into_response();
        }
    };

    let request_id = inbound.id;
    tracing::debug!(
        request_id = %request_id,
        method = %inbound.method,
        path = %inbound.path,
        delay_ms = state.delay.as_millis() as u64,
        "Request accepted, forward scheduled"
    );

    let pending = PendingForward::new(
        &state.scheduler,
        inbound,
        state.delay,
        state.forwarder.target().clone(),
    )
    .with_read_ahead(state.read_ahead);

    match pending.ready().await {
        Ok(inbound) => state.forwarder.forward(inbound).await,
        Err(NotDispatched::BodyAborted(e)) => {
            tracing::debug!(request_id = %request_id, error = %e, "Request body aborted");
            (StatusCode::BAD_REQUEST, "Request body aborted").into_response()
        }
        Err(e @ NotDispatched::SchedulerClosed(_)) => {
            tracing::error!(request_id = %request_id, error = %e, "Forward not dispatched");
            (StatusCode::SERVICE_UNAVAILABLE, "Proxy shutting down").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Response as HttpResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;
    use tower::ServiceExt;

    /// Answers every request with its path, counting calls.
    #[derive(Clone, Default)]
    struct CountingUpstream {
        calls: Arc<AtomicUsize>,
    }

    impl UpstreamClient for CountingUpstream {
        async fn send(&self, request: Request<Body>) -> Result<HttpResponse<Body>, ForwardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = request.uri().path().to_string();
            Ok(HttpResponse::new(Body::from(path)))
        }
    }

    fn config(delay_ms: u64) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.delay.millis = delay_ms;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_after_delay() {
        let upstream = CountingUpstream::default();
        let server = ProxyServer::with_client(config(250), upstream.clone()).unwrap();
        let start = Instant::now();

        let request = Request::builder().uri("/foo/bar").body(Body::empty()).unwrap();
        let response = server.router().oneshot(request).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"/foo/bar");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_request_never_reaches_upstream() {
        let upstream = CountingUpstream::default();
        let server = ProxyServer::with_client(config(1_000), upstream.clone()).unwrap();

        let request = Request::builder().uri("/abandoned").body(Body::empty()).unwrap();
        let in_flight = server.router().oneshot(request);
        assert!(tokio::time::timeout(Duration::from_millis(100), in_flight).await.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.scheduler().pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn body_cut_short_never_reaches_upstream() {
        let upstream = CountingUpstream::default();
        let server = ProxyServer::with_client(config(1_000), upstream.clone()).unwrap();
        let start = Instant::now();

        // One chunk, then the client disappears.
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
            Ok("first chunk"),
            Err(std::io::ErrorKind::ConnectionReset.into()),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks));
        let request = Request::builder().method(Method::POST).uri("/upload").body(body).unwrap();
        let response = server.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(start.elapsed() < Duration::from_millis(1_000));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.scheduler().pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn authority_form_is_a_protocol_error() {
        let upstream = CountingUpstream::default();
        let server = ProxyServer::with_client(config(10), upstream.clone()).unwrap();

        let request = Request::builder()
            .method(Method::CONNECT)
            .uri("example.com:443")
            .body(Body::empty())
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
        assert_eq!(server.scheduler().pending(), 0);
    }

    #[test]
    fn invalid_target_is_rejected_at_construction() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();

        let mut config = config(10);
        config.target.address = "bad target".into();
        assert!(matches!(
            ProxyServer::with_client(config, CountingUpstream::default()),
            Err(ForwardError::InvalidTarget(_))
        ));
    }
}

//! Forwarding dispatcher.
//!
//! # Responsibilities
//! - Rebuild the inbound request against the fixed target (method and
//!   path-and-query verbatim, end-to-end headers verbatim, body streamed)
//! - Bound the wait for the upstream response head
//! - Relay the upstream response back without buffering it
//! - Map failures to gateway errors; never retry

use std::str::FromStr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{uri::Authority, Request, Response, Uri},
    response::IntoResponse,
};

use crate::forward::client::UpstreamClient;
use crate::forward::error::ForwardError;
use crate::http::request::InboundRequest;
use crate::http::response;
use crate::observability::metrics;

/// The fixed `host:port` every request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    authority: Authority,
}

impl UpstreamTarget {
    pub fn parse(address: &str) -> Result<Self, ForwardError> {
        Authority::from_str(address)
            .map(|authority| Self { authority })
            .map_err(|e| ForwardError::InvalidTarget(format!("{address}: {e}")))
    }

    pub fn authority(&self) -> &str {
        self.authority.as_str()
    }

    /// Absolute URI for `path_and_query` on this target.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, ForwardError> {
        Uri::builder()
            .scheme("http")
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(ForwardError::from)
    }
}

impl std::fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.authority.fmt(f)
    }
}

/// Relays requests to one upstream target through an [`UpstreamClient`].
pub struct Forwarder<C> {
    client: C,
    target: UpstreamTarget,
    response_timeout: Duration,
}

impl<C: UpstreamClient> Forwarder<C> {
    pub fn new(client: C, target: UpstreamTarget, response_timeout: Duration) -> Self {
        Self {
            client,
            target,
            response_timeout,
        }
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Build the request sent upstream. Consumes the inbound request.
    pub fn outbound_request(&self, request: InboundRequest) -> Result<Request<Body>, ForwardError> {
        let InboundRequest {
            method,
            path,
            mut headers,
            body,
            ..
        } = request;

        headers.strip_hop_by_hop();

        let mut outbound = Request::builder()
            .method(method)
            .uri(self.target.uri_for(&path)?)
            .body(body)?;
        *outbound.headers_mut() = headers.into();
        Ok(outbound)
    }

    /// Forward once and return the upstream response, or the failure.
    pub async fn try_forward(&self, request: InboundRequest) -> Result<Response<Body>, ForwardError> {
        let outbound = self.outbound_request(request)?;

        match tokio::time::timeout(self.response_timeout, self.client.send(outbound)).await {
            Ok(result) => result.map(response::relay),
            Err(_) => Err(ForwardError::Timeout(self.response_timeout)),
        }
    }

    /// Forward once and always produce a response for the caller.
    pub async fn forward(&self, request: InboundRequest) -> Response<Body> {
        let request_id = request.id;
        let method = request.method.clone();
        let path = request.path.clone();
        let received_at = request.received_at;
        let start = Instant::now();

        match self.try_forward(request).await {
            Ok(response) => {
                let status = response.status();
                tracing::debug!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    target = %self.target,
                    status = status.as_u16(),
                    upstream_ms = start.elapsed().as_millis() as u64,
                    total_ms = received_at.elapsed().as_millis() as u64,
                    "Forwarded request"
                );
                metrics::record_forward(method.as_str(), status.as_u16(), start);
                response
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    target = %self.target,
                    error = %e,
                    "Upstream error"
                );
                metrics::record_forward(method.as_str(), e.status().as_u16(), start);
                e.into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use std::sync::{Arc, Mutex};

    /// Records what it was sent and answers with the configured outcome.
    #[derive(Clone, Default)]
    struct FakeUpstream {
        seen: Arc<Mutex<Vec<(Method, Uri, Vec<(String, String)>, Vec<u8>)>>>,
        fail: bool,
        hang: bool,
    }

    impl UpstreamClient for FakeUpstream {
        async fn send(&self, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(ForwardError::Unreachable("connection refused".into()));
            }

            let (parts, body) = request.into_parts();
            let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
            let headers = parts
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap().to_string()))
                .collect();
            self.seen
                .lock()
                .unwrap()
                .push((parts.method, parts.uri, headers, body.to_vec()));

            Ok(Response::builder()
                .status(StatusCode::ACCEPTED)
                .header("x-upstream", "fake")
                .header("connection", "keep-alive")
                .body(Body::from("relayed body"))
                .unwrap())
        }
    }

    fn forwarder(client: FakeUpstream) -> Forwarder<FakeUpstream> {
        Forwarder::new(
            client,
            UpstreamTarget::parse("127.0.0.1:9008").unwrap(),
            Duration::from_millis(200),
        )
    }

    fn inbound(request: Request<Body>) -> InboundRequest {
        InboundRequest::from_http(request).unwrap()
    }

    #[tokio::test]
    async fn relays_method_path_headers_and_body() {
        let client = FakeUpstream::default();
        let forwarder = forwarder(client.clone());

        let request = Request::builder()
            .method(Method::PUT)
            .uri("/foo/bar?x=1")
            .header("host", "localhost:8008")
            .header("x-test", "1")
            .header("x-multi", "a")
            .header("x-multi", "b")
            .header("connection", "close")
            .body(Body::from("payload"))
            .unwrap();

        let response = forwarder.forward(inbound(request)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["x-upstream"], "fake");
        assert!(response.headers().get("connection").is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"relayed body");

        let seen = client.seen.lock().unwrap();
        let (method, uri, headers, body) = &seen[0];
        assert_eq!(*method, Method::PUT);
        assert_eq!(uri.to_string(), "http://127.0.0.1:9008/foo/bar?x=1");
        assert_eq!(
            headers,
            &vec![
                ("host".to_string(), "localhost:8008".to_string()),
                ("x-test".to_string(), "1".to_string()),
                ("x-multi".to_string(), "a".to_string()),
                ("x-multi".to_string(), "b".to_string()),
            ]
        );
        assert_eq!(body, b"payload");
    }

    #[tokio::test]
    async fn upstream_failure_is_bad_gateway_without_retry() {
        let client = FakeUpstream {
            fail: true,
            ..Default::default()
        };
        let forwarder = forwarder(client.clone());

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = forwarder.forward(inbound(request)).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_upstream_is_gateway_timeout() {
        let client = FakeUpstream {
            hang: true,
            ..Default::default()
        };
        let forwarder = forwarder(client);

        let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let err = forwarder.try_forward(inbound(request)).await.unwrap_err();

        assert!(matches!(err, ForwardError::Timeout(_)));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn target_rejects_garbage() {
        assert!(UpstreamTarget::parse("not a host").is_err());
        let target = UpstreamTarget::parse("localhost:9008").unwrap();
        assert_eq!(target.uri_for("/x").unwrap().to_string(), "http://localhost:9008/x");
    }
}

//! Upstream client capability.
//!
//! The dispatcher only needs "send a request, get a response". That seam is
//! the `UpstreamClient` trait so the relay can be exercised against fakes
//! without a network stack.

use std::error::Error as _;
use std::future::Future;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::forward::error::ForwardError;

/// Sends one request to the upstream and yields its streamed response.
pub trait UpstreamClient: Send + Sync + 'static {
    fn send(
        &self,
        request: Request<Body>,
    ) -> impl Future<Output = Result<Response<Body>, ForwardError>> + Send;
}

/// Pooled hyper client; reuses idle upstream connections.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpConnector, Body>,
}

impl HyperUpstream {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .retry_canceled_requests(false)
            .build(connector);

        Self { client }
    }
}

impl UpstreamClient for HyperUpstream {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        match self.client.request(request).await {
            Ok(response) => Ok(response.map(Body::new)),
            Err(e) => {
                let detail = match e.source() {
                    Some(source) => format!("{e}: {source}"),
                    None => e.to_string(),
                };
                Err(ForwardError::Unreachable(detail))
            }
        }
    }
}

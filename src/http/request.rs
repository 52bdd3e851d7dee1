//! Inbound request model.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for log correlation
//! - Extract the request target's path-and-query (origin or absolute form)
//! - Snapshot the headers into the ordered `HeaderMultiMap`
//! - Keep the body as a stream; it is never buffered here
//!
//! # Design Decisions
//! - The request ID is never written into the relayed headers
//! - Requests without a path (authority-form) are protocol errors

use std::fmt;
use std::time::Instant;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, Version},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::http::headers::HeaderMultiMap;

/// Unique identifier attached to each proxied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A request that cannot be proxied.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request target has no path: {0}")]
    MissingPath(String),
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// A parsed inbound request, owned by the proxy until handed to the dispatcher.
pub struct InboundRequest {
    pub id: RequestId,
    pub method: Method,
    /// Path and query exactly as received, e.g. `/foo/bar?x=1`.
    pub path: String,
    pub version: Version,
    pub headers: HeaderMultiMap,
    pub body: Body,
    pub received_at: Instant,
}

impl fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl InboundRequest {
    /// Take ownership of an HTTP request.
    pub fn from_http(request: Request<Body>) -> Result<Self, RequestError> {
        let (parts, body) = request.into_parts();

        let path = match parts.uri.path_and_query() {
            Some(pq) if pq.as_str().starts_with('/') => pq.as_str().to_string(),
            Some(pq) if pq.as_str().starts_with('?') => format!("/{}", pq.as_str()),
            _ => return Err(RequestError::MissingPath(parts.uri.to_string())),
        };

        Ok(Self {
            id: RequestId::new(),
            method: parts.method,
            path,
            version: parts.version,
            headers: HeaderMultiMap::from(&parts.headers),
            body,
            received_at: Instant::now(),
        })
    }
}

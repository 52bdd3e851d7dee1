//! Response relay towards the original caller.
//!
//! # Responsibilities
//! - Relay the upstream status, headers and body stream unchanged
//! - Strip hop-by-hop headers from the upstream leg
//!
//! # Design Decisions
//! - The body is passed through as a stream, never collected
//! - Framing (`Transfer-Encoding`, `Connection`) is re-derived by the server

use axum::{body::Body, http::Response};

use crate::http::headers::HeaderMultiMap;

/// Prepare an upstream response for the client connection.
pub fn relay(response: Response<Body>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();

    let mut headers = HeaderMultiMap::from(&parts.headers);
    headers.strip_hop_by_hop();
    parts.headers = headers.into();

    Response::from_parts(parts, body)
}

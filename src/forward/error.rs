//! Forwarding errors and their client-facing responses.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Why a forward attempt failed. Every variant is terminal for its request.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// Connection to the target was refused, reset or failed mid-request.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// The target did not produce a response head in time.
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// The configured target cannot be turned into a URI.
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    /// The outbound request could not be assembled.
    #[error("failed to build upstream request: {0}")]
    Build(#[from] axum::http::Error),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Unreachable(_)
            | ForwardError::InvalidTarget(_)
            | ForwardError::Build(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let body = match self.status() {
            StatusCode::GATEWAY_TIMEOUT => "Upstream request timed out",
            _ => "Upstream request failed",
        };
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_gateway_statuses() {
        assert_eq!(
            ForwardError::Unreachable("refused".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ForwardError::Timeout(Duration::from_secs(1)).into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ForwardError::InvalidTarget("::".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}

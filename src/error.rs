//! Relay error taxonomy and its HTTP mapping.
//!
//! Every failure surfaced to the caller is a structured JSON body
//! carrying a short machine-checkable `error` kind and a human-readable
//! `message`. Debug detail is attached only when the server runs with
//! `debug_errors` enabled.

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Failures the relay reports to its caller.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("invalid request format: {0}")]
    InvalidFormat(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),

    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    /// Short machine-checkable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "method_not_allowed",
            Self::InvalidFormat(_) => "invalid_format",
            Self::Timeout => "timeout",
            Self::InvalidUpstreamResponse(_) => "invalid_upstream_response",
            Self::UpstreamHttp { .. } => "upstream_http_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status surfaced to the caller. Upstream HTTP failures
    /// mirror the upstream status when it is a valid code.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidUpstreamResponse(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamHttp { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message for the response body.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout => {
                "The request timed out. Try a shorter message, or retry in a moment.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// JSON body for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,

    /// Debug representation, present only with `debug_errors` enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorBody {
    /// Build the response body for an error, attaching debug detail
    /// only when asked to.
    pub fn from_error(err: &RelayError, debug: bool) -> Self {
        Self {
            error: err.kind(),
            message: err.user_message(),
            detail: debug.then(|| format!("{err:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RelayError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(RelayError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            RelayError::InvalidFormat("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::UpstreamHttp { status: 503, body: String::new() }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        // An unmappable upstream status falls back to 502.
        assert_eq!(
            RelayError::UpstreamHttp { status: 42, body: String::new() }.status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_detail_only_in_debug() {
        let err = RelayError::InvalidUpstreamResponse("missing content".into());
        assert!(ErrorBody::from_error(&err, false).detail.is_none());
        assert!(ErrorBody::from_error(&err, true).detail.is_some());
    }
}

//! Request-level failures and their client-facing form.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::rewrite::TargetError;

/// Everything that turns a proxied request into an error response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing, malformed, or non-http(s) target.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connect failure, DNS failure, timeout, or a transport error mid-body.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The upstream body claimed an encoding it did not honor.
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// An HTML body, raw or decompressed, exceeded the rewrite buffer.
    #[error("upstream body too large: {0}")]
    BodyTooLarge(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamUnreachable(_)
            | ProxyError::DecodeFailure(_)
            | ProxyError::BodyTooLarge(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable kind, also used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::DecodeFailure(_) => "decode_failure",
            ProxyError::BodyTooLarge(_) => "body_too_large",
        }
    }

    fn message(&self) -> &str {
        match self {
            ProxyError::InvalidRequest(m)
            | ProxyError::UpstreamUnreachable(m)
            | ProxyError::DecodeFailure(m)
            | ProxyError::BodyTooLarge(m) => m,
        }
    }
}

impl From<TargetError> for ProxyError {
    fn from(e: TargetError) -> Self {
        ProxyError::InvalidRequest(e.to_string())
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        let detail = if e.is_timeout() {
            format!("timed out: {e}")
        } else if e.is_connect() {
            format!("connect failed: {e}")
        } else {
            e.to_string()
        };
        ProxyError::UpstreamUnreachable(detail)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: &'a str,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), error = %self, "Proxy request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "Rejected proxy request");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ProxyError::InvalidRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::UpstreamUnreachable("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::DecodeFailure("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::BodyTooLarge("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn body_is_structured_json() {
        let response = ProxyError::from(TargetError::Scheme("ftp".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["kind"], "invalid_request");
        assert!(json["error"]["message"].as_str().unwrap().contains("ftp"));
    }
}

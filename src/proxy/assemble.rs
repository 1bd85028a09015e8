//! Response assembly: choose between buffering and streaming, then emit.
//!
//! ```text
//! text/html, not HEAD, not 204/304, decodable coding
//!     → buffer (capped) → decode → charset → rewrite headers + body
//!     → re-encode in the same charset → fixed Content-Length
//! everything else
//!     → rewrite headers → stream body as received
//! ```

use std::fmt;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;

use crate::config::RewriteConfig;
use crate::observability::metrics;
use crate::proxy::charset;
use crate::proxy::decode::{decode_body, ContentCoding};
use crate::proxy::error::ProxyError;
use crate::rewrite::{headers, is_html_document, rewrite_html, RewriteContext};

/// Bounds on the buffering path.
#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    /// Deadline for the whole body to arrive.
    pub timeout: Duration,
    /// Cap on the body, both as received and once decompressed.
    pub max_bytes: usize,
}

/// Which way a response body travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPath {
    Rewrite,
    Passthrough,
}

impl BodyPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyPath::Rewrite => "rewrite",
            BodyPath::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for BodyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
}

/// Decide the body path from the response head alone.
pub fn select_path(method: &Method, status: StatusCode, headers: &HeaderMap) -> BodyPath {
    let has_body = *method != Method::HEAD
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
        && !status.is_informational();
    if !has_body || !is_html(headers) {
        return BodyPath::Passthrough;
    }

    let coding = ContentCoding::from_headers(headers);
    if !coding.is_supported() {
        tracing::warn!(?coding, "HTML with undecodable content-encoding streamed unmodified");
        return BodyPath::Passthrough;
    }
    BodyPath::Rewrite
}

/// Turn an upstream response into the client response.
pub async fn assemble(
    upstream: reqwest::Response,
    method: &Method,
    ctx: &RewriteContext,
    options: &RewriteConfig,
    limits: BufferLimits,
) -> Result<(Response, BodyPath), ProxyError> {
    let status = upstream.status();
    let path = select_path(method, status, upstream.headers());

    match path {
        BodyPath::Passthrough => Ok((assemble_passthrough(upstream, ctx), path)),
        BodyPath::Rewrite => {
            let head = upstream.headers().clone();
            let body = match tokio::time::timeout(limits.timeout, read_capped(upstream, limits.max_bytes)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ProxyError::UpstreamUnreachable(format!(
                        "body not received within {}s",
                        limits.timeout.as_secs()
                    )))
                }
            };
            let response = assemble_rewritten(status, &head, &body, ctx, options, limits.max_bytes)?;
            Ok((response, path))
        }
    }
}

/// Buffer the whole body, refusing anything past `max_bytes`.
async fn read_capped(mut upstream: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>, ProxyError> {
    let too_large = || ProxyError::BodyTooLarge(format!("HTML body exceeds {max_bytes} bytes"));

    if upstream.content_length().is_some_and(|len| len > max_bytes as u64) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = upstream.chunk().await? {
        if body.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Buffered path: decode, rewrite, and re-frame with an exact length.
pub fn assemble_rewritten(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    body: &[u8],
    ctx: &RewriteContext,
    options: &RewriteConfig,
    max_bytes: usize,
) -> Result<Response, ProxyError> {
    let coding = ContentCoding::from_headers(upstream_headers);
    let decoded = decode_body(body, &coding, max_bytes)?;

    let encoding = charset::detect(upstream_headers, &decoded);
    let out = if charset::is_rewritable(encoding) {
        let text = charset::decode(&decoded, encoding);
        if is_html_document(&text) {
            let rewritten = rewrite_html(&text, ctx, options).into_owned();
            Bytes::from(charset::encode(rewritten, encoding))
        } else {
            Bytes::copy_from_slice(&decoded)
        }
    } else {
        tracing::debug!(encoding = encoding.name(), "HTML charset not rewritable, body left as decoded");
        Bytes::copy_from_slice(&decoded)
    };

    tracing::debug!(
        target_url = %ctx.base(),
        encoding = encoding.name(),
        upstream_bytes = body.len(),
        decoded_bytes = decoded.len(),
        rewritten_bytes = out.len(),
        "Rewrote HTML response"
    );
    metrics::record_rewritten_bytes(out.len());

    let mut out_headers = headers::transform(upstream_headers, ctx, ctx.identity().is_secure());
    out_headers.remove(CONTENT_ENCODING);
    out_headers.insert(CONTENT_LENGTH, HeaderValue::from(out.len()));

    Ok(build(status, out_headers, Body::from(out)))
}

/// Streaming path: only headers change; framing headers stay as received.
pub fn assemble_passthrough(upstream: reqwest::Response, ctx: &RewriteContext) -> Response {
    let status = upstream.status();
    let out_headers = headers::transform(upstream.headers(), ctx, ctx.identity().is_secure());
    build(status, out_headers, Body::from_stream(upstream.bytes_stream()))
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

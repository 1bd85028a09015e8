//! Upstream fetching.
//!
//! One attempt per inbound request. Redirects are never followed here: the
//! `Location` is rewritten and handed back so the browser follows it through
//! the proxy.

use std::time::Duration;

use axum::body::{Body, HttpBody};
use axum::http::header::{
    HeaderMap, HeaderValue, ACCEPT_ENCODING, HOST, ORIGIN, REFERER,
};
use axum::http::Method;
use url::Url;

use crate::config::TimeoutConfig;
use crate::proxy::decode::ACCEPTED_ENCODINGS;
use crate::proxy::error::ProxyError;
use crate::rewrite::headers::{connection_tokens, is_hop_by_hop};
use crate::rewrite::{url as proxy_url, RewriteContext};

/// A validated request bound for the upstream.
#[derive(Debug)]
pub struct ProxyRequest {
    pub target: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<reqwest::Body>,
}

impl ProxyRequest {
    /// Build the upstream request from the inbound parts.
    ///
    /// The body is streamed, not buffered; an empty inbound body sends none.
    pub fn from_inbound(
        ctx: &RewriteContext,
        method: Method,
        inbound: &HeaderMap,
        body: Body,
    ) -> Self {
        let body = if body.is_end_stream() || body.size_hint().exact() == Some(0) {
            None
        } else {
            Some(reqwest::Body::wrap_stream(body.into_data_stream()))
        };

        Self {
            target: ctx.base().clone(),
            method,
            headers: forward_headers(inbound, ctx),
            body,
        }
    }
}

/// Headers sent upstream for an inbound request.
///
/// `Referer` is translated back to the upstream page it names, or dropped
/// when it does not point at a proxied page.
pub fn forward_headers(inbound: &HeaderMap, ctx: &RewriteContext) -> HeaderMap {
    let named_by_connection = connection_tokens(inbound);
    let mut out = HeaderMap::with_capacity(inbound.len() + 1);

    for (name, value) in inbound.iter() {
        if is_hop_by_hop(name)
            || named_by_connection.iter().any(|t| t == name.as_str())
            || *name == HOST
            || *name == ACCEPT_ENCODING
            || *name == ORIGIN
        {
            continue;
        }

        if *name == REFERER {
            let upstream = value
                .to_str()
                .ok()
                .and_then(|raw| proxy_url::decode(raw, ctx))
                .and_then(|url| HeaderValue::from_str(url.as_str()).ok());
            if let Some(v) = upstream {
                out.insert(REFERER, v);
            }
            continue;
        }

        out.append(name.clone(), value.clone());
    }

    out.insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPTED_ENCODINGS));
    out
}

/// Pooled upstream client.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    response_timeout: Duration,
}

impl Fetcher {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .pool_max_idle_per_host(32)
            .build()?;

        Ok(Self {
            client,
            response_timeout: Duration::from_secs(timeouts.request_secs),
        })
    }

    /// Deadline for response headers, and for the whole body when buffering.
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Send the request and wait for the response head.
    pub async fn send(&self, request: ProxyRequest) -> Result<reqwest::Response, ProxyError> {
        let mut builder = self
            .client
            .request(request.method, request.target.clone())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        match tokio::time::timeout(self.response_timeout, builder.send()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProxyError::UpstreamUnreachable(format!(
                "no response from {} within {}s",
                request.target.host_str().unwrap_or_default(),
                self.response_timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::context::fixtures::context;
    use axum::http::header::{CONNECTION, CONTENT_LENGTH, COOKIE, USER_AGENT};

    fn inbound(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn strips_connection_scoped_and_identity_headers() {
        let ctx = context("https://example.com/page");
        let out = forward_headers(
            &inbound(&[
                ("host", "localhost:3000"),
                ("connection", "keep-alive, x-hop"),
                ("x-hop", "1"),
                ("origin", "http://localhost:3000"),
                ("accept-encoding", "gzip, br, zstd"),
                ("user-agent", "test"),
                ("cookie", "sid=abc"),
                ("content-length", "5"),
            ]),
            &ctx,
        );

        assert!(out.get(HOST).is_none());
        assert!(out.get(CONNECTION).is_none());
        assert!(out.get("x-hop").is_none());
        assert!(out.get(ORIGIN).is_none());
        assert_eq!(out.get(ACCEPT_ENCODING).unwrap(), ACCEPTED_ENCODINGS);
        assert_eq!(out.get(USER_AGENT).unwrap(), "test");
        assert_eq!(out.get(COOKIE).unwrap(), "sid=abc");
        assert_eq!(out.get(CONTENT_LENGTH).unwrap(), "5");
    }

    #[test]
    fn referer_translated_or_dropped() {
        let ctx = context("https://example.com/next");
        let out = forward_headers(
            &inbound(&[(
                "referer",
                "http://localhost:3000/proxy?url=https%3A%2F%2Fexample.com%2Fprev",
            )]),
            &ctx,
        );
        assert_eq!(out.get(REFERER).unwrap(), "https://example.com/prev");

        let foreign = forward_headers(&inbound(&[("referer", "https://elsewhere.test/")]), &ctx);
        assert!(foreign.get(REFERER).is_none());
    }

    #[test]
    fn empty_body_not_forwarded() {
        let ctx = context("https://example.com/");
        let req = ProxyRequest::from_inbound(&ctx, Method::GET, &HeaderMap::new(), Body::empty());
        assert!(req.body.is_none());
        assert_eq!(req.target.as_str(), "https://example.com/");

        let req = ProxyRequest::from_inbound(&ctx, Method::POST, &HeaderMap::new(), Body::from("a=1"));
        assert!(req.body.is_some());
    }
}

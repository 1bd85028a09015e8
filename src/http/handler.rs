//! Request handlers: the proxy route and liveness.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use url::{form_urlencoded, Url};

use crate::config::RewriteConfig;
use crate::observability::metrics;
use crate::proxy::{assemble, BodyPath, BufferLimits, Fetcher, ProxyError, ProxyRequest};
use crate::rewrite::{parse_target, ProxyIdentity, RewriteContext, Routing, TargetError};

/// Application state injected into handlers.
pub struct AppState {
    pub identity: Arc<ProxyIdentity>,
    pub fetcher: Fetcher,
    pub rewrite: RewriteConfig,
    /// Largest HTML body buffered for rewriting.
    pub max_rewrite_body: usize,
}

/// Proxy one request, whatever the method.
pub async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    let (response, path) = match forward(&state, request).await {
        Ok((response, path)) => (response, path.as_str()),
        Err(e) => {
            if e.status().is_server_error() {
                metrics::record_upstream_error(e.kind());
            }
            (e.into_response(), "error")
        }
    };

    tracing::info!(
        method = %method,
        status = response.status().as_u16(),
        path,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Proxied request"
    );
    metrics::record_request(method.as_str(), response.status().as_u16(), path, start);
    response
}

async fn forward(state: &AppState, request: Request<Body>) -> Result<(Response, BodyPath), ProxyError> {
    let target = resolve_target(&state.identity, request.uri())?;
    let ctx = RewriteContext::new(target, Arc::clone(&state.identity));

    let (parts, body) = request.into_parts();
    tracing::debug!(method = %parts.method, target_url = %ctx.base(), "Forwarding upstream");

    let upstream_request = ProxyRequest::from_inbound(&ctx, parts.method.clone(), &parts.headers, body);
    let upstream = state.fetcher.send(upstream_request).await?;
    tracing::debug!(
        target_url = %ctx.base(),
        status = upstream.status().as_u16(),
        "Upstream responded"
    );

    let limits = BufferLimits {
        timeout: state.fetcher.response_timeout(),
        max_bytes: state.max_rewrite_body,
    };
    assemble(upstream, &parts.method, &ctx, &state.rewrite, limits).await
}

/// Upstream URL named by an inbound request URI.
///
/// In query mode, pairs other than the first `url` are appended to the
/// target's query. A GET form submitted through the proxy arrives that way:
/// the browser replaces the action's query with a hidden `url` field
/// followed by the form fields.
pub fn resolve_target(identity: &ProxyIdentity, uri: &Uri) -> Result<Url, ProxyError> {
    match identity.routing() {
        Routing::Query => {
            let mut pairs: Vec<_> =
                form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes()).collect();
            let at = pairs
                .iter()
                .position(|(key, _)| key == "url")
                .ok_or(TargetError::Missing)?;
            let (_, raw) = pairs.remove(at);
            let mut target = parse_target(&raw)?;
            if !pairs.is_empty() {
                target.query_pairs_mut().extend_pairs(pairs);
            }
            Ok(target)
        }
        Routing::Prefix { target } => {
            let rest = uri
                .path()
                .strip_prefix(identity.path_prefix())
                .unwrap_or_default();
            let mut url = target.clone();
            url.set_path(if rest.is_empty() { "/" } else { rest });
            url.set_query(uri.query());
            Ok(url)
        }
    }
}

/// Liveness probe.
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::context::fixtures::{context, prefix_context};

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn query_mode_targets() {
        let identity = context("https://example.com/").identity().clone();
        let url = resolve_target(&identity, &uri("/proxy?url=https%3A%2F%2Fexample.com%2Fabout%3Fx%3D1")).unwrap();
        assert_eq!(url.as_str(), "https://example.com/about?x=1");

        let url = resolve_target(&identity, &uri("/proxy?url=https%3A%2F%2Fexample.com%2Fsearch&q=rust")).unwrap();
        assert_eq!(url.as_str(), "https://example.com/search?q=rust");

        for bad in ["/proxy", "/proxy?other=1", "/proxy?url=", "/proxy?url=ftp%3A%2F%2Fexample.com%2F", "/proxy?url=nope"] {
            let err = resolve_target(&identity, &uri(bad)).unwrap_err();
            assert!(matches!(err, ProxyError::InvalidRequest(_)), "{bad}");
        }
    }

    #[test]
    fn form_fields_merge_into_target_query() {
        let identity = context("https://example.com/").identity().clone();
        let url = resolve_target(
            &identity,
            &uri("/proxy?q=rust+lang&url=https%3A%2F%2Fexample.com%2Fsearch%3Fkeep%3D1&page=2&url=ignored"),
        )
        .unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.path(), "/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("keep".to_string(), "1".to_string()),
                ("q".to_string(), "rust lang".to_string()),
                ("page".to_string(), "2".to_string()),
                ("url".to_string(), "ignored".to_string()),
            ]
        );
    }

    #[test]
    fn prefix_mode_targets() {
        let identity = prefix_context("https://example.com/").identity().clone();
        assert_eq!(
            resolve_target(&identity, &uri("/proxy/docs/a.html?q=1")).unwrap().as_str(),
            "https://example.com/docs/a.html?q=1"
        );
        assert_eq!(
            resolve_target(&identity, &uri("/proxy")).unwrap().as_str(),
            "https://example.com/"
        );
    }
}

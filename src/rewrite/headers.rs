//! Response header transformation.
//!
//! # Rules
//! 1. Hop-by-hop headers (and any named by `Connection`) are dropped
//! 2. `X-Frame-Options` is dropped
//! 3. CSP gets a `frame-ancestors` naming the proxy; one is added if absent
//! 4. `Location`, `Content-Location` and `Refresh` targets route through the proxy
//! 5. `Set-Cookie` becomes `SameSite=None` with `Secure` matching the transport
//! 6. Everything else is copied
//!
//! Each header falls under exactly one rule, so input order does not matter.

use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LOCATION,
    CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY_REPORT_ONLY, LOCATION, REFRESH,
    SET_COOKIE, X_FRAME_OPTIONS,
};

use crate::rewrite::context::RewriteContext;
use crate::rewrite::{cookie, csp, url};

/// Connection-scoped headers that never cross the proxy.
pub const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Header names listed in `Connection`, lowercased.
pub fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Map an upstream header set to the one sent to the client.
pub fn transform(upstream: &HeaderMap, ctx: &RewriteContext, secure_transport: bool) -> HeaderMap {
    let named_by_connection = connection_tokens(upstream);
    let ancestors = ctx.identity().frame_ancestors();

    let mut out = HeaderMap::with_capacity(upstream.len() + 1);
    let mut has_csp = false;

    for (name, value) in upstream.iter() {
        if is_hop_by_hop(name) || named_by_connection.iter().any(|t| t == name.as_str()) {
            continue;
        }

        if *name == X_FRAME_OPTIONS {
            continue;
        } else if *name == CONTENT_SECURITY_POLICY || *name == CONTENT_SECURITY_POLICY_REPORT_ONLY {
            // Values that are not visible ASCII cannot be parsed as a policy; drop them
            // and let the synthesized policy below take their place.
            let Ok(policy) = value.to_str() else { continue };
            let rewritten = csp::ensure_frame_ancestors(policy, ancestors);
            if let Ok(v) = HeaderValue::from_str(&rewritten) {
                has_csp |= *name == CONTENT_SECURITY_POLICY;
                out.append(name.clone(), v);
            }
        } else if *name == LOCATION || *name == CONTENT_LOCATION {
            out.append(name.clone(), map_text(value, |raw| url::rewrite(raw, ctx).into_owned()));
        } else if *name == REFRESH {
            out.append(name.clone(), map_text(value, |raw| rewrite_refresh(raw, ctx)));
        } else if *name == SET_COOKIE {
            out.append(
                name.clone(),
                map_text(value, |raw| cookie::rewrite_set_cookie(raw, secure_transport)),
            );
        } else {
            out.append(name.clone(), value.clone());
        }
    }

    if !has_csp {
        if let Ok(v) = HeaderValue::from_str(&csp::frame_ancestors_only(ancestors)) {
            out.insert(CONTENT_SECURITY_POLICY, v);
        }
    }

    out
}

/// Apply `f` to the textual form of a header value, keeping the original on
/// non-UTF-8 input or when the result is not a legal header value.
fn map_text(value: &HeaderValue, f: impl FnOnce(&str) -> String) -> HeaderValue {
    let Ok(raw) = std::str::from_utf8(value.as_bytes()) else {
        return value.clone();
    };
    HeaderValue::from_str(&f(raw)).unwrap_or_else(|_| value.clone())
}

/// `Refresh: 5; url=/next` keeps its delay and rewrites the target.
fn rewrite_refresh(raw: &str, ctx: &RewriteContext) -> String {
    let Some((delay, rest)) = raw.split_once([';', ',']) else {
        return raw.to_string();
    };
    let rest = rest.trim_start();
    match rest.get(..4) {
        Some(key) if key.eq_ignore_ascii_case("url=") => {
            let target = rest[4..].trim().trim_matches(|c| c == '"' || c == '\'');
            format!("{}; url={}", delay.trim(), url::rewrite(target, ctx))
        }
        _ => raw.to_string(),
    }
}

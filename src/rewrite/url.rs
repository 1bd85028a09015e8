//! Reference rewriting between upstream URLs and proxy-relative form.
//!
//! # Layout
//! ```text
//! query mode:   /proxy?url=https%3A%2F%2Fexample.com%2Fabout#frag
//! prefix mode:  /proxy/about?x=1#frag          (fixed target origin only)
//! ```
//!
//! The fragment stays outside the encoded parameter so in-page anchors keep
//! working. Both directions are total: anything that cannot be rewritten is
//! returned as-is.

use std::borrow::Cow;

use url::form_urlencoded;
use url::Url;

use crate::rewrite::context::{RewriteContext, Routing};

/// Why an inbound target was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    Missing,
    Malformed(String),
    Scheme(String),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::Missing => write!(f, "missing target url"),
            TargetError::Malformed(e) => write!(f, "malformed target url: {}", e),
            TargetError::Scheme(s) => write!(f, "unsupported scheme {:?}; only http and https are proxied", s),
        }
    }
}

impl std::error::Error for TargetError {}

/// Parse an absolute target URL, accepting only http and https.
pub fn parse_target(raw: &str) -> Result<Url, TargetError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TargetError::Missing);
    }
    let url = Url::parse(raw).map_err(|e| TargetError::Malformed(e.to_string()))?;
    if !is_web_scheme(&url) {
        return Err(TargetError::Scheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        return Err(TargetError::Malformed("missing host".to_string()));
    }
    Ok(url)
}

fn is_web_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Rewrite one reference found in a document so it routes through the proxy.
pub fn rewrite<'a>(reference: &'a str, ctx: &RewriteContext) -> Cow<'a, str> {
    let trimmed = reference.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || is_proxied(trimmed, ctx) {
        return Cow::Borrowed(reference);
    }

    let resolved = match ctx.base().join(trimmed) {
        Ok(url) => url,
        Err(e) => {
            tracing::trace!(reference = %trimmed, error = %e, "Reference left as-is");
            return Cow::Borrowed(reference);
        }
    };
    if !is_web_scheme(&resolved) {
        return Cow::Borrowed(reference);
    }

    match encode(&resolved, ctx) {
        Some(proxied) => Cow::Owned(proxied),
        None => Cow::Borrowed(reference),
    }
}

/// Proxy-relative form of an absolute URL, or `None` when the routing mode
/// cannot express it.
pub fn encode(url: &Url, ctx: &RewriteContext) -> Option<String> {
    let identity = ctx.identity();
    let prefix = identity.path_prefix();

    match identity.routing() {
        Routing::Query => {
            let mut without_fragment = url.clone();
            without_fragment.set_fragment(None);
            let encoded: String =
                form_urlencoded::byte_serialize(without_fragment.as_str().as_bytes()).collect();

            let mut out = String::with_capacity(prefix.len() + encoded.len() + 5);
            out.push_str(prefix);
            out.push_str("?url=");
            out.push_str(&encoded);
            if let Some(fragment) = url.fragment() {
                out.push('#');
                out.push_str(fragment);
            }
            Some(out)
        }
        Routing::Prefix { target } => {
            if url.origin() != target.origin() {
                return None;
            }
            let mut out = String::from(prefix);
            out.push_str(url.path());
            if let Some(query) = url.query() {
                out.push('?');
                out.push_str(query);
            }
            if let Some(fragment) = url.fragment() {
                out.push('#');
                out.push_str(fragment);
            }
            Some(out)
        }
    }
}

/// Recover the upstream URL from a proxy-relative (or proxy-absolute) reference.
pub fn decode(proxied: &str, ctx: &RewriteContext) -> Option<Url> {
    let identity = ctx.identity();
    let local = strip_origin(proxied.trim(), identity.origin());
    let rest = local.strip_prefix(identity.path_prefix())?;

    let (rest, fragment) = match rest.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (rest, None),
    };

    let mut url = match identity.routing() {
        Routing::Query => {
            let query = rest.strip_prefix('?')?;
            let raw = form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())?;
            parse_target(&raw).ok()?
        }
        Routing::Prefix { target } => {
            if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?')) {
                return None;
            }
            let path_and_query = if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{rest}")
            };
            target.join(&path_and_query).ok()?
        }
    };

    if fragment.is_some() {
        url.set_fragment(fragment);
    }
    Some(url)
}

/// True when `reference` already points at the proxy's own route.
pub fn is_proxied(reference: &str, ctx: &RewriteContext) -> bool {
    let identity = ctx.identity();
    let local = strip_origin(reference, identity.origin());
    let Some(rest) = local.strip_prefix(identity.path_prefix()) else {
        return false;
    };

    match identity.routing() {
        Routing::Query => rest.starts_with("?url=") || rest.contains("&url="),
        Routing::Prefix { .. } => {
            rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('#')
        }
    }
}

fn strip_origin<'a>(reference: &'a str, origin: &str) -> &'a str {
    match reference.get(..origin.len()) {
        Some(head) if head.eq_ignore_ascii_case(origin) => &reference[origin.len()..],
        _ => reference,
    }
}

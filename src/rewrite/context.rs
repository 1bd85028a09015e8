//! Immutable per-response rewrite inputs.

use std::net::SocketAddr;
use std::sync::Arc;

use url::Url;

use crate::config::{ProxyConfig, RoutingMode};

/// How proxied references are laid out on the proxy's own origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// `{prefix}?url=<absolute-url>`
    Query,
    /// `{prefix}/<path>` relative to a single fixed upstream origin.
    Prefix { target: Url },
}

/// Process-wide identity of the proxy, built once at startup.
#[derive(Debug, Clone)]
pub struct ProxyIdentity {
    origin: String,
    path_prefix: String,
    routing: Routing,
    frame_ancestors: Vec<String>,
    secure: bool,
}

impl ProxyIdentity {
    /// Build an identity from explicit parts.
    ///
    /// `origin` is normalized to its ASCII serialization so it compares equal to
    /// what `Url::origin` produces elsewhere.
    pub fn new(
        origin: &Url,
        path_prefix: impl Into<String>,
        routing: Routing,
        extra_ancestors: &[String],
    ) -> Self {
        let serialized = origin.origin().ascii_serialization();
        let mut frame_ancestors = vec![serialized.clone()];
        for extra in extra_ancestors {
            let extra = extra.trim();
            if !extra.is_empty() && !frame_ancestors.iter().any(|a| a == extra) {
                frame_ancestors.push(extra.to_string());
            }
        }

        Self {
            secure: origin.scheme() == "https",
            origin: serialized,
            path_prefix: path_prefix.into(),
            routing,
            frame_ancestors,
        }
    }

    /// Derive the identity from validated configuration.
    ///
    /// Without an explicit `public_origin`, the origin is built from the selected
    /// transport and the bound address; unspecified bind IPs map to `localhost`.
    pub fn from_config(
        config: &ProxyConfig,
        secure_transport: bool,
        local_addr: SocketAddr,
    ) -> Result<Self, url::ParseError> {
        let origin = match &config.proxy.public_origin {
            Some(raw) => Url::parse(raw)?,
            None => {
                let scheme = if secure_transport { "https" } else { "http" };
                let host = if local_addr.ip().is_unspecified() {
                    "localhost".to_string()
                } else if local_addr.is_ipv6() {
                    format!("[{}]", local_addr.ip())
                } else {
                    local_addr.ip().to_string()
                };
                Url::parse(&format!("{scheme}://{host}:{}", local_addr.port()))?
            }
        };

        let routing = match config.routing.mode {
            RoutingMode::Query => Routing::Query,
            RoutingMode::Prefix => {
                let raw = config.routing.target.as_deref().unwrap_or_default();
                Routing::Prefix {
                    target: Url::parse(raw)?,
                }
            }
        };

        Ok(Self::new(
            &origin,
            config.proxy.path_prefix.clone(),
            routing,
            &config.proxy.frame_ancestors,
        ))
    }

    /// ASCII serialization of the proxy origin, e.g. `https://localhost:3000`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    /// Sources placed in `frame-ancestors`; the proxy origin is always first.
    pub fn frame_ancestors(&self) -> &[String] {
        &self.frame_ancestors
    }

    /// Whether browsers reach the proxy over TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

/// Everything a rewrite rule needs for one response.
///
/// Never mutated once built; `with_base` produces a new value for documents
/// that declare `<base href>`.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    base: Url,
    identity: Arc<ProxyIdentity>,
}

impl RewriteContext {
    pub fn new(target: Url, identity: Arc<ProxyIdentity>) -> Self {
        Self {
            base: target,
            identity,
        }
    }

    /// URL that relative references resolve against.
    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn identity(&self) -> &ProxyIdentity {
        &self.identity
    }

    pub fn with_base(&self, base: Url) -> Self {
        Self {
            base,
            identity: Arc::clone(&self.identity),
        }
    }
}

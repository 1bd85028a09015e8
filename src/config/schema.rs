//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the embedding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Public identity of the proxy (origin, path prefix, allowed embedders).
    pub proxy: PublicConfig,

    /// Inbound routing convention shared by the route matcher and the URL rewriter.
    pub routing: RoutingConfig,

    /// Optional body rewrites.
    pub rewrite: RewriteConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Request size limits.
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Optional TLS configuration. A load failure falls back to plain HTTP.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// How the proxy presents itself to browsers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublicConfig {
    /// Externally visible origin (e.g., "https://localhost:3000").
    ///
    /// When unset it is derived from the selected transport and the bind address.
    pub public_origin: Option<String>,

    /// Path under which proxied traffic is served.
    pub path_prefix: String,

    /// Extra origins allowed to frame proxied pages, besides the proxy itself.
    pub frame_ancestors: Vec<String>,
}

impl Default for PublicConfig {
    fn default() -> Self {
        Self {
            public_origin: None,
            path_prefix: "/proxy".to_string(),
            frame_ancestors: Vec::new(),
        }
    }
}

/// Routing convention for proxied references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// `{prefix}?url=<absolute-url>`; any origin.
    #[default]
    Query,
    /// `{prefix}/<path>`; a single fixed target origin.
    Prefix,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RoutingConfig {
    pub mode: RoutingMode,

    /// Fixed upstream origin, required in prefix mode.
    pub target: Option<String>,
}

/// Body rewrite toggles.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Remove `<meta http-equiv="Content-Security-Policy">` tags.
    pub strip_meta_csp: bool,

    /// Turn `top.location = ...` style assignments into no-ops.
    pub neutralize_frame_busting: bool,

    /// Replace `navigator.serviceWorker.register(...)` with a no-op.
    pub block_service_workers: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            strip_meta_csp: true,
            neutralize_frame_busting: true,
            block_service_workers: true,
        }
    }
}

/// Timeout configuration for upstream operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the upstream to produce response headers, and for
    /// buffered (rewritten) bodies to arrive in full, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Emit JSON log lines instead of the compact human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,

    /// Largest HTML body buffered for rewriting, before and after decompression.
    pub max_rewrite_body: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 64 * 1024 * 1024, // 64MB
            max_rewrite_body: 16 * 1024 * 1024,
        }
    }
}

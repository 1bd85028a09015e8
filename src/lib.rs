//! Embedding proxy library.
//!
//! Fetches pages from arbitrary origins and rewrites headers and HTML so the
//! result can be framed cross-origin while every reference keeps routing
//! through the proxy.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod rewrite;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;

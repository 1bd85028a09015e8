//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms via the metrics facade)
//!
//! Per-request spans and x-request-id come from tower-http layers in http::server.
//!
//! Consumers:
//!     → stdout (compact or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod logging;
pub mod metrics;

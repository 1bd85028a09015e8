//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, compact format for development
//! - `RUST_LOG` overrides the built-in filter

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "embed_proxy=debug,tower_http=info";

/// Install the global subscriber. A second call is a no-op.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_current_span(true)))
        .with((!json).then(|| fmt::layer().compact()))
        .try_init();

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

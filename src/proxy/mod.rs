//! Upstream exchange subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request (target already validated)
//!     → fetch.rs (forward headers, stream body, one attempt)
//!     → assemble.rs (select path)
//!         → decode.rs (gzip/deflate, buffering path only)
//!         → charset.rs (bytes to text and back, buffering path only)
//!         → crate::rewrite (headers always, HTML body when buffered)
//!     → client response
//! ```
//!
//! # Design Decisions
//! - No retries: a failed attempt is reported as 502 immediately
//! - Passthrough bodies are never buffered; backpressure comes from the client socket
//! - Buffered bodies are capped by `security.max_rewrite_body`, before and after decompression
//! - Errors are `ProxyError`, rendered as JSON by `IntoResponse`

pub mod assemble;
pub mod charset;
pub mod decode;
pub mod error;
pub mod fetch;

pub use assemble::{assemble, BodyPath, BufferLimits};
pub use error::ProxyError;
pub use fetch::{Fetcher, ProxyRequest};

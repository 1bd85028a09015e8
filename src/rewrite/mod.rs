//! Response rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! upstream headers
//!     → headers.rs (hop-by-hop, framing, Location/Refresh)
//!         → csp.rs (frame-ancestors)
//!         → cookie.rs (SameSite=None, Secure)
//!         → url.rs (reference → proxy-relative)
//!
//! upstream HTML (decoded text)
//!     → html.rs (tokenize, rewrite attributes)
//!         → url.rs
//!         → css.rs (url() in <style> and style="")
//!         → script.rs (frame-busting, service workers)
//! ```
//!
//! # Design Decisions
//! - Every function here is pure and total: a fragment that cannot be
//!   rewritten is returned unchanged
//! - `RewriteContext` is built once per response and never mutated
//! - Nothing here performs I/O

pub mod context;
pub mod cookie;
pub mod css;
pub mod csp;
pub mod headers;
pub mod html;
pub mod scan;
pub mod script;
pub mod url;

pub use context::{ProxyIdentity, RewriteContext, Routing};
pub use html::{is_html_document, rewrite_html};
pub use self::url::{parse_target, TargetError};

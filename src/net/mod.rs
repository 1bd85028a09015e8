//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup
//!     → listener.rs (bind, resolve local address)
//!     → tls.rs (load certificate, or fall back to plain HTTP)
//!     → Hand off to HTTP layer as (TcpListener, Transport)
//! ```
//!
//! # Design Decisions
//! - Transport is decided once; a broken certificate never prevents startup
//! - The bound address feeds the proxy's public origin when none is configured

pub mod listener;
pub mod tls;

pub use tls::Transport;

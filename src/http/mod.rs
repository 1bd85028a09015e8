//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware: request ID, trace, limits)
//!     → handler.rs (resolve target from the route, 400 on bad input)
//!     → crate::proxy (fetch, assemble)
//!     → Send to client
//! ```

pub mod handler;
pub mod server;

pub use handler::AppState;
pub use server::{HttpServer, ServerError};

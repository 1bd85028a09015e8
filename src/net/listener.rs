//! TCP listener binding.
//!
//! # Responsibilities
//! - Parse and bind the configured address
//! - Report the actual bound address (port 0 resolves here)
//!
//! In-flight request limits are enforced by the HTTP layer, not here.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The configured address did not parse.
    Address(std::net::AddrParseError),
    /// Failed to bind to address.
    Bind(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Address(e) => write!(f, "Invalid bind address: {}", e),
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Bind to the configured address and return the listener with its bound address.
pub async fn bind(config: &ListenerConfig) -> Result<(TcpListener, SocketAddr), ListenerError> {
    let addr: SocketAddr = config.bind_address.parse().map_err(ListenerError::Address)?;

    let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

    tracing::info!(
        address = %local_addr,
        max_connections = config.max_connections,
        "Listener bound"
    );

    Ok((listener, local_addr))
}

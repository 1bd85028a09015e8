//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Bind the listener and pick the transport (TLS or plain)
//! - Derive the proxy's public identity from config and the bound address
//! - Create the Axum Router for the configured routing mode
//! - Wire up middleware (request ID, tracing, body and concurrency limits)
//! - Serve until the shutdown signal, then drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::handler::{health_handler, proxy_handler, AppState};
use crate::lifecycle::shutdown::signalled;
use crate::net::{listener, Transport};
use crate::net::tls::select_transport;
use crate::proxy::Fetcher;
use crate::rewrite::{ProxyIdentity, Routing};

/// Drain period granted to TLS connections after shutdown is signalled.
const TLS_DRAIN: Duration = Duration::from_secs(10);

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("listener: {0}")]
    Listener(#[from] listener::ListenerError),
    #[error("public origin: {0}")]
    Origin(#[from] url::ParseError),
    #[error("upstream client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the embedding proxy.
pub struct HttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    transport: Transport,
    identity: Arc<ProxyIdentity>,
    router: Router,
}

impl HttpServer {
    /// Bind, select the transport and build the router. Nothing is served yet.
    pub async fn bind(config: ProxyConfig) -> Result<Self, ServerError> {
        let (listener, local_addr) = listener::bind(&config.listener).await?;
        let transport = select_transport(config.listener.tls.as_ref()).await;
        let identity = Arc::new(ProxyIdentity::from_config(
            &config,
            transport.is_secure(),
            local_addr,
        )?);

        tracing::info!(
            public_origin = identity.origin(),
            path_prefix = identity.path_prefix(),
            transport = ?transport,
            routing = ?config.routing.mode,
            "Proxy identity established"
        );

        let state = Arc::new(AppState {
            identity: Arc::clone(&identity),
            fetcher: Fetcher::new(&config.timeouts)?,
            rewrite: config.rewrite,
            max_rewrite_body: config.security.max_rewrite_body,
        });
        let router = Self::build_router(&config, &identity, state);

        Ok(Self {
            listener,
            local_addr,
            transport,
            identity,
            router,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, identity: &ProxyIdentity, state: Arc<AppState>) -> Router {
        let prefix = identity.path_prefix();
        let mut router = Router::new()
            .route("/healthz", get(health_handler))
            .route(prefix, any(proxy_handler));
        if let Routing::Prefix { .. } = identity.routing() {
            router = router.route(&format!("{prefix}/{{*path}}"), any(proxy_handler));
        }

        router
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }),
            )
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Address actually bound; differs from config when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Origin browsers use to reach the proxy.
    pub fn public_origin(&self) -> &str {
        self.identity.origin()
    }

    pub fn is_secure(&self) -> bool {
        self.transport.is_secure()
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        tracing::info!(
            address = %self.local_addr,
            public_origin = self.identity.origin(),
            "HTTP server starting"
        );

        match self.transport {
            Transport::Insecure => {
                axum::serve(self.listener, self.router)
                    .with_graceful_shutdown(signalled(shutdown))
                    .await?;
            }
            Transport::Secure(tls) => {
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    signalled(shutdown).await;
                    drain.graceful_shutdown(Some(TLS_DRAIN));
                });

                let listener = self.listener.into_std()?;
                axum_server::from_tcp_rustls(listener, tls)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

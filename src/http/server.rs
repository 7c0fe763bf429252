//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap an [`App`] in an Axum router
//! - Wire up middleware (request ID, tracing span)
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Axum only provides the connection loop; all routing happens in `App`
//! - Graceful shutdown on Ctrl-C or a `Shutdown` trigger

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::http::request::{MakeRequestUuidV4, X_REQUEST_ID};
use crate::lifecycle::shutdown_signal;
use crate::routing::App;

/// Failure to start or run the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("a mounted router cannot listen; use App::new()")]
    NotTopLevel,
}

/// HTTP server for an application.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server for a top-level application.
    pub fn new(app: App) -> Result<Self, ServerError> {
        if !app.is_top_level() {
            return Err(ServerError::NotTopLevel);
        }
        Ok(Self {
            router: Self::build_router(Arc::new(app)),
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(app: Arc<App>) -> Router {
        let fallback = move |request: Request| {
            let app = Arc::clone(&app);
            async move { app.handle(request).await }
        };

        Router::new().fallback(fallback).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
                .layer(TraceLayer::new_for_http().make_span_with(
                    |request: &axum::http::Request<Body>| {
                        let request_id = request
                            .headers()
                            .get(X_REQUEST_ID)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("unknown");
                        tracing::info_span!(
                            "request",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = %request_id,
                        )
                    },
                ))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let service = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

impl App {
    /// Bind `host:port` and serve this application until shutdown.
    pub async fn listen(
        self,
        host: &str,
        port: u16,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let server = HttpServer::new(self)?;
        let address = format!("{host}:{port}");
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        server.run(listener, shutdown).await
    }
}

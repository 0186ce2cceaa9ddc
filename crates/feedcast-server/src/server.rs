use std::time::Duration;

use axum::http::StatusCode;
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use feedcast_store::{Database, RecordRepo};

use crate::error::ServerError;
use crate::handlers::{add_handler, health_handler};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub records: RecordRepo,
    pub db: Database,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self {
            records: RecordRepo::new(db.clone()),
            db,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    with_layers(
        Router::new()
            .route("/add", post(add_handler))
            .route("/health", get(health_handler))
            .with_state(state),
        request_timeout,
    )
}

fn with_layers(router: Router, request_timeout: Duration) -> Router {
    router
        .layer(TimeoutLayer::new(request_timeout))
        .layer(map_response(timeout_envelope))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// The timeout layer answers with a bare 408; give it the usual error body.
async fn timeout_envelope(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        tracing::warn!("request timed out");
        return ServerError::BadRequest("request timed out".into()).into_response();
    }
    response
}

/// Bind and start serving. The server drains and stops once `cancel` fires.
pub async fn start(
    config: ServerConfig,
    db: Database,
    cancel: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState::new(db), config.request_timeout);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "ingestion server started");

    let server = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "ingestion server failed");
        }
        tracing::info!("ingestion server stopped");
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
    })
}

/// Handle to a running server.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the serve task to finish after its token was cancelled.
    pub async fn stopped(self) {
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "ingestion server task panicked");
        }
    }
}

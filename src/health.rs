//! Liveness endpoint.

use axum::{routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::RelayError;

/// Body returned by every health route.
pub const HEALTH_BODY: &str = "running";

/// Health check handler.
pub async fn health() -> &'static str {
    HEALTH_BODY
}

/// Router serving `/` and `/health`.
pub fn create_router() -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

/// Listener address for the health endpoint.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub host: String,
    pub port: u16,
}

impl HealthConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Serve the health endpoint until `shutdown` is cancelled.
pub async fn serve(config: HealthConfig, shutdown: CancellationToken) -> crate::Result<()> {
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(RelayError::Io)?;

    tracing::info!("Health endpoint listening on {}", addr);

    axum::serve(listener, create_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| RelayError::Io(std::io::Error::other(e.to_string())))?;

    Ok(())
}

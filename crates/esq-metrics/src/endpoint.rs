//! HTTP endpoint for serving metrics

use crate::{MetricRegistry, MetricsError, Result};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// HTTP endpoint serving `/metrics` and `/health`
#[derive(Debug)]
pub struct MetricsEndpoint {
    registry: MetricRegistry,
    bind_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    server_handle: Option<JoinHandle<()>>,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    pub fn new(registry: MetricRegistry, bind_addr: SocketAddr) -> Self {
        Self {
            registry,
            bind_addr,
            local_addr: None,
            server_handle: None,
        }
    }

    /// Start the HTTP server
    pub async fn start(&mut self) -> Result<()> {
        if self.server_handle.is_some() {
            return Err(MetricsError::Config("Server already started".to_string()));
        }

        let app = create_app(self.registry.clone());
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Starting metrics endpoint server on {}", local_addr);

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Metrics endpoint server error: {}", e);
            }
        });

        self.local_addr = Some(local_addr);
        self.server_handle = Some(server_handle);
        Ok(())
    }

    /// Stop the HTTP server
    pub async fn stop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
            let _ = handle.await;
            info!("Metrics endpoint server stopped");
        }
        self.local_addr = None;
    }

    /// Address the server is listening on, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get the metrics URL
    pub fn metrics_url(&self) -> String {
        format!("http://{}/metrics", self.local_addr.unwrap_or(self.bind_addr))
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.server_handle.is_some()
    }
}

impl Drop for MetricsEndpoint {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

/// Create the Axum application
pub fn create_app(registry: MetricRegistry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(registry)
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(registry): State<MetricRegistry>) -> Response {
    match registry.export_text() {
        Ok(metrics) => (
            StatusCode::OK,
            [(CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            metrics,
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to export metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to export metrics").into_response()
        }
    }
}

/// Handler for /health endpoint
async fn health_handler(State(registry): State<MetricRegistry>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "series": registry.series_count(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
        .into_response()
}

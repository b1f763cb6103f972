//! Prometheus HTTP exporter.
//!
//! Serves `/metrics` (text exposition) and `/health` from a bound
//! [`TcpListener`]. Binding is separate from serving so that an address
//! conflict surfaces as an error before any operation starts.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get};
use snafu::ResultExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::registry::TransferMetrics;
use crate::error::{BindSnafu, MetricsError, ServeSnafu};

/// Content type of the Prometheus text format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// A bound, not yet serving, metrics endpoint.
pub struct MetricsServer {
    listener: TcpListener,
    metrics: Arc<TransferMetrics>,
}

impl MetricsServer {
    /// Bind the exporter to `addr`. Port 0 picks a free port.
    pub async fn bind(addr: SocketAddr, metrics: Arc<TransferMetrics>) -> Result<Self, MetricsError> {
        let listener = TcpListener::bind(addr)
            .await
            .context(BindSnafu { address: addr })?;
        Ok(Self { listener, metrics })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, MetricsError> {
        self.listener.local_addr().context(ServeSnafu)
    }

    /// Serve requests until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), MetricsError> {
        let addr = self.local_addr()?;
        info!(%addr, "Metrics server started");

        axum::serve(self.listener, router(self.metrics))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context(ServeSnafu)?;

        info!(%addr, "Metrics server stopped");
        Ok(())
    }

    /// Serve on a background task. Errors are logged, not returned.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve(shutdown).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

/// Build the exporter routes over `metrics`.
pub fn router(metrics: Arc<TransferMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .fallback(not_found)
        .with_state(metrics)
}

/// Handler for `/metrics` endpoint.
async fn metrics_handler(State(metrics): State<Arc<TransferMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Handler for `/health` endpoint.
async fn health_handler() -> &'static str {
    "OK"
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

//! # Stader Operator Metrics Exporter
//!
//! Serves the cached operator snapshot in the prometheus text format at `GET /metrics`.
//! The exporter owns its own [`Registry`]; nothing is registered globally, so several
//! exporters (or tests) can coexist in one process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{error, info};
use prometheus::{Encoder, Registry, TextEncoder};
use snafu::{ResultExt, Snafu};
use stader_core::state_cache::StateCache;
use tokio::net::TcpListener;

/// Gauges built from the cached snapshot.
pub mod collector;

use collector::{OperatorCollector, SnapshotSource};

/// Exporter errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The collector could not be registered.
    #[snafu(display("failed to register operator collector: {source}"))]
    Register {
        /// Source error
        source: prometheus::Error,
    },

    /// Metrics could not be encoded.
    #[snafu(display("failed to encode metrics: {source}"))]
    Encode {
        /// Source error
        source: prometheus::Error,
    },

    /// The encoder produced invalid UTF-8.
    #[snafu(display("metrics output is not UTF-8: {source}"))]
    Utf8 {
        /// Source error
        source: std::string::FromUtf8Error,
    },

    /// The metrics listener could not be bound.
    #[snafu(display("failed to bind metrics server to {addr}: {source}"))]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Source error
        source: std::io::Error,
    },

    /// The metrics server stopped.
    #[snafu(display("metrics server failed: {source}"))]
    Serve {
        /// Source error
        source: std::io::Error,
    },
}

/// Result alias for exporter operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Prometheus registry exposing one snapshot source.
pub struct MetricsExporter {
    /// Registry holding the operator collector.
    registry: Registry,
}

impl MetricsExporter {
    /// Creates an exporter for `source`.
    pub fn new(source: Arc<dyn SnapshotSource>) -> Result<Self> {
        let registry = Registry::new();
        let collector = OperatorCollector::new(source).context(RegisterSnafu)?;
        registry
            .register(Box::new(collector))
            .context(RegisterSnafu)?;
        Ok(Self { registry })
    }

    /// Renders every metric in the text exposition format.
    pub fn render(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .context(EncodeSnafu)?;
        String::from_utf8(buffer).context(Utf8Snafu)
    }

    /// Router serving `GET /metrics`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self)
    }

    /// Serves the metrics endpoint on `bind_addr` until the server fails.
    pub async fn serve(self: Arc<Self>, bind_addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .context(BindSnafu { addr: bind_addr })?;
        info!("📊 Prometheus metrics server running on http://{bind_addr}");

        axum::serve(listener, self.router())
            .await
            .context(ServeSnafu)
    }
}

/// `GET /metrics`
async fn metrics_handler(State(exporter): State<Arc<MetricsExporter>>) -> Response {
    match exporter.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("❌ Failed to render metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Refreshes `cache` every `refresh_interval` and serves its metrics on `bind_addr`.
pub async fn run(
    cache: Arc<StateCache>,
    bind_addr: SocketAddr,
    refresh_interval: Duration,
) -> Result<()> {
    let exporter = Arc::new(MetricsExporter::new(cache.clone())?);
    let refresher = cache.spawn_refresh_loop(refresh_interval);
    let served = exporter.serve(bind_addr).await;
    refresher.abort();
    served
}

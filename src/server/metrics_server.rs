// src/server/metrics_server.rs

//! Optional Prometheus exporter: a tiny axum server on its own port.

use crate::core::metrics;
use axum::{Router, routing::get};
use tracing::{error, info};

async fn metrics_handler() -> String {
    metrics::gather_text()
}

pub async fn run(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = format!("0.0.0.0:{port}");
    info!(%addr, "metrics exporter listening");
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "metrics exporter failed");
            }
        }
        Err(e) => error!(error = %e, %addr, "metrics exporter could not bind"),
    }
}

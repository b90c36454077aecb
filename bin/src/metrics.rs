use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use tracing::{error, info};

async fn metrics_handler(handle: PrometheusHandle) -> String {
    handle.render()
}

/// Serves the Prometheus scrape endpoint on its own listener, separate from
/// the simulation API.
pub async fn start_metrics_server(
    addr: SocketAddr,
    prometheus_handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>, Box<dyn std::error::Error>> {
    let app = Router::new().route(
        "/metrics",
        get(move || metrics_handler(prometheus_handle.clone())),
    );

    info!("metrics exporter listening at http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind metrics server to {}: {}", addr, e))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });
    Ok(handle)
}

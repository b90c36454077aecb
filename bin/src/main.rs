use std::{error::Error, net::SocketAddr, sync::Arc};

use configs::AppConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use simulation_core::SimulationService;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;

mod metrics;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let configs = AppConfig::new()?;

    let level = configs
        .tracing
        .level
        .parse()
        .map_err(|_| {
            eprintln!("Invalid tracing level: {}", configs.tracing.level);
            configs.tracing.level.clone()
        })
        .unwrap_or(tracing::Level::INFO);

    let subscriber_builder = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    match configs.tracing.format {
        configs::LogFormat::Pretty => {
            subscriber_builder
                .with_span_events(FmtSpan::CLOSE)
                .pretty()
                .init();
        }
        configs::LogFormat::Json => {
            subscriber_builder
                .with_span_events(FmtSpan::CLOSE)
                .json()
                .init();
        }
    }

    if configs.metrics.enabled {
        let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
        let addr: SocketAddr = configs.metrics.listen_address.parse()?;
        metrics::start_metrics_server(addr, prometheus_handle).await?;
    }

    let service = Arc::new(SimulationService::new(configs.evm, configs.substrate).await?);

    let app = http_server::router(service);
    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        configs.server.host, configs.server.port
    ))
    .await?;

    info!("HTTP server started at {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

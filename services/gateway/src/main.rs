//! Gateway binary.

use purchase_gateway::{Config, GatewayState, PurchaseService, ReadProxy, build_router};
use purchase_pipeline_core::environment::SystemClock;
use purchase_pipeline_redpanda::RedpandaEventLog;
use purchase_pipeline_runtime::metrics::install_recorder;
use purchase_pipeline_web::server::{serve, shutdown_signal};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,purchase_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting purchase gateway");

    let config = Config::from_env()?;
    info!(
        brokers = %config.kafka.bootstrap_servers,
        topic = %config.kafka.topic,
        upstream = %config.upstream.url,
        "Configuration loaded"
    );

    let metrics = install_recorder()?;

    let event_log = RedpandaEventLog::builder()
        .brokers(&config.kafka.bootstrap_servers)
        .topic(&config.kafka.topic)
        .producer_acks(&config.kafka.producer_acks)
        .timeout(config.publish_timeout())
        .build()?;
    info!("Event log producer ready");

    let purchases = Arc::new(PurchaseService::new(Arc::new(event_log), Arc::new(SystemClock)));
    let proxy = ReadProxy::new(&config.upstream.url, config.upstream_timeout())?;
    let router = build_router(GatewayState::new(purchases, proxy), metrics);

    let listener = TcpListener::bind(config.bind_address()).await?;
    serve(listener, router, shutdown_signal()).await?;

    info!("Purchase gateway stopped");
    Ok(())
}

//! Ledger binary.

use purchase_ledger::{Application, Config};
use purchase_pipeline_web::server::shutdown_signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,purchase_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting purchase ledger");

    let config = Config::from_env()?;
    let app = Application::build(&config).await?;
    info!(address = %app.local_addr()?, "Ledger ready");

    // A worker failure surfaces here and exits the process non-zero.
    app.run(shutdown_signal()).await?;

    info!("Purchase ledger stopped");
    Ok(())
}

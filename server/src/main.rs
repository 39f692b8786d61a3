//! Gridsync Server - REST backend for data grids.
//!
//! Loads the seed records, then serves search, fetch, find and commit
//! endpoints until interrupted.

use gridsync_server::config::Config;
use gridsync_server::db::{self, Table};
use gridsync_server::{app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridsync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Gridsync Server on {}:{}", config.host, config.port);

    // Load seed records
    let records = match &config.seed_file {
        Some(path) => {
            tracing::info!("Loading seed records from {}", path.display());
            db::load_seed(path)?
        }
        None => Vec::new(),
    };
    let table = Table::new(config.id_property.clone(), records, config.initial_rows)?;
    tracing::info!("Serving {} records keyed by '{}'", table.len().await, table.id_property());

    let addr = format!("{}:{}", config.host, config.port);
    let app = app(AppState::new(config, table));

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutting down");
    }
}

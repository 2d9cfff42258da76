//! Batwatch Gateway: dashboard API for bat-acoustic recording units.
//! Serves the unit registry, remote commands, device status reports, recording and
//! prediction browsing (via the external prediction API) and a live change feed.

mod error;
mod jobs;
mod routes;
mod views;

use std::sync::Arc;
use std::time::Duration;

use batwatch_core::{DashboardConfig, DashboardStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::routes::{router, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[batwatch-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("gateway stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = DashboardConfig::load()?;
    let store = DashboardStore::open(config.store_path())?;
    let addr = config.listen_addr();
    tracing::info!(
        app = %config.app_name,
        predict_api = %config.predict_api_url,
        "starting gateway"
    );

    let state = Arc::new(AppState::new(config, store)?);
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.jobs.shutdown(Duration::from_secs(5)).await;
    state.store.flush().await?;
    tracing::info!("gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("ctrl-c handler failed: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

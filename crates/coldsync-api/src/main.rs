mod config;
mod error;
mod routes;

use std::sync::Arc;

use coldsync_core::clock::SystemClock;
use coldsync_core::db::{Database, QueueContext};
use coldsync_core::models::BackoffSchedule;
use coldsync_core::services::{SchedulerSettings, SyncScheduler};
use config::ApiConfig;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["coldsync_api=info", "coldsync_core=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Arc::new(ApiConfig::from_env()?);
    tracing::info!("Starting coldsync-api with config: {:?}", config);

    let db = Arc::new(Database::open(&config.sync.db_path).await?);
    let ctx = QueueContext::new(
        Arc::new(SystemClock),
        BackoffSchedule::default(),
        config.sync.max_retries,
    );
    let state = AppState::new(Arc::clone(&config), Arc::clone(&db), ctx.clone());

    let mut scheduler = SyncScheduler::new(db, ctx, SchedulerSettings::from_config(&config.sync))
        .with_media(state.media.clone())
        .with_pools(state.pools.clone());
    scheduler.start().await?;

    let bind_addr = config.bind_addr.clone();
    let router = app_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("coldsync-api listening on {}", bind_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

use coldsync_core::services::{SchedulerSettings, SyncScheduler};

use crate::commands::common::App;
use crate::error::CliError;

pub async fn run_workers(app: App) -> Result<(), CliError> {
    let mut scheduler = SyncScheduler::new(
        app.db,
        app.ctx,
        SchedulerSettings::from_config(&app.config),
    )
    .with_media(app.media)
    .with_pools(app.pools);

    scheduler.start().await?;
    println!("coldsync workers running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    scheduler.stop().await;
    Ok(())
}

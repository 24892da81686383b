use coldsync_core::services::MediaEnqueue;

use crate::commands::common::{print_json, App};
use crate::error::CliError;

pub async fn run_enqueue(app: &App, request: &MediaEnqueue, as_json: bool) -> Result<(), CliError> {
    let outcome = app
        .media
        .enqueue_media(request)
        .await?
        .ok_or(CliError::NoTargets)?;

    if as_json {
        print_json(&outcome)?;
    } else {
        println!("Record {}: {outcome:?}", outcome.id());
    }
    Ok(())
}

pub async fn run_initial_sync(app: &App) -> Result<(), CliError> {
    if !app.media.targets().has_durable() {
        return Err(CliError::NoTargets);
    }
    let enqueued = app.media.run_initial_sync().await?;
    println!("Queued {enqueued} media files");
    Ok(())
}

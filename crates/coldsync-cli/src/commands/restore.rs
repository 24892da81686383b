use crate::commands::common::{format_bytes, print_json, App};
use crate::error::CliError;

pub async fn run_restore(app: &App, as_json: bool) -> Result<(), CliError> {
    if !app.media.targets().has_durable() {
        return Err(CliError::NoTargets);
    }

    let progress = app.media.bulk_restore().await?;
    if as_json {
        return print_json(&progress);
    }

    println!(
        "Restored {}/{} files ({} of {}), {} failed",
        progress.restored_files,
        progress.total_files,
        format_bytes(progress.bytes_restored),
        format_bytes(progress.bytes_total),
        progress.failed_files
    );
    if let Some(error) = &progress.error {
        println!("First error: {error}");
    }
    Ok(())
}

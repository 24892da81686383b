use coldsync_core::db::{LibSqlReplicationRepository, ReplicationRepository};
use coldsync_core::models::QueueKind;

use crate::cli::QueueArg;
use crate::commands::common::{format_record_lines, parse_media_source, print_json, App};
use crate::error::CliError;

pub async fn run_retry(app: &App, queue: QueueArg, source: Option<&str>) -> Result<(), CliError> {
    let count = match queue {
        QueueArg::Media => {
            app.media
                .retry_all_failed(parse_media_source(source)?)
                .await?
        }
        QueueArg::Pool => app.pools.retry_failed(source).await?,
    };
    println!("Reset {count} failed records");
    Ok(())
}

pub async fn run_reset(app: &App, queue: QueueArg, id: i64, as_json: bool) -> Result<(), CliError> {
    let conn = app.db.connect().await?;
    let record = LibSqlReplicationRepository::new(&conn, QueueKind::from(queue), &app.ctx)
        .reset_pending(id)
        .await?;

    if as_json {
        return print_json(&record);
    }
    println!("Record {id} is now {}", record.status);
    for line in format_record_lines(std::slice::from_ref(&record)) {
        println!("{line}");
    }
    Ok(())
}

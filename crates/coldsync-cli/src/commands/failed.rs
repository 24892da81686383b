use crate::cli::QueueArg;
use crate::commands::common::{format_record_lines, parse_media_source, print_json, App};
use crate::error::CliError;

pub async fn run_failed(
    app: &App,
    queue: QueueArg,
    source: Option<&str>,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let records = match queue {
        QueueArg::Media => {
            app.media
                .recent_failed(parse_media_source(source)?, limit)
                .await?
        }
        QueueArg::Pool => app.pools.recent_failed(source, limit).await?,
    };

    if as_json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No failed records.");
        return Ok(());
    }
    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

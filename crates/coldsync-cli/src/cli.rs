use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use coldsync_core::models::{MediaSource, QueueKind};
use coldsync_core::Target;

#[derive(Parser)]
#[command(name = "coldsync")]
#[command(about = "Replicate captured media and pool files to NAS and R2")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override COLDSYNC_DB_PATH
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run sync workers, pool scanners and the reaper until interrupted
    Run,
    /// Queue one media file for replication
    Enqueue {
        #[arg(long, value_enum)]
        source: SourceArg,
        /// Business media row id
        #[arg(long)]
        media_id: i64,
        /// Path relative to COLDSYNC_LOCAL_BASE_DIR
        #[arg(long)]
        file_path: String,
        #[arg(long)]
        file_name: String,
        /// File size in bytes
        #[arg(long)]
        size: i64,
        #[arg(long)]
        thock: String,
        #[arg(long, default_value = "photo")]
        media_type: String,
        /// Where the file was first written
        #[arg(long, value_enum, default_value = "local")]
        origin: TargetArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently failed records
    Failed {
        #[arg(long, value_enum, default_value = "media")]
        queue: QueueArg,
        /// Media source tag or pool name
        #[arg(long)]
        source: Option<String>,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Return failed records to pending
    Retry {
        #[arg(long, value_enum, default_value = "media")]
        queue: QueueArg,
        /// Media source tag or pool name
        #[arg(long)]
        source: Option<String>,
    },
    /// Reset one record to pending
    Reset {
        #[arg(long, value_enum, default_value = "media")]
        queue: QueueArg,
        /// Record id
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan one pool (or every configured pool) now
    Scan {
        /// Pool name
        #[arg(long)]
        pool: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download replicated media that is missing on local disk
    Restore {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Release claims older than the lease and abandoned scan flags
    Reap {
        /// Lease in seconds (defaults to SYNC_CLAIM_LEASE_SECS)
        #[arg(long)]
        lease_secs: Option<u64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue every business media row that has no replication record
    InitialSync,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueueArg {
    Media,
    Pool,
}

impl From<QueueArg> for QueueKind {
    fn from(value: QueueArg) -> Self {
        match value {
            QueueArg::Media => Self::Media,
            QueueArg::Pool => Self::Pool,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SourceArg {
    RoomEntry,
    GatePass,
}

impl From<SourceArg> for MediaSource {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::RoomEntry => Self::RoomEntry,
            SourceArg::GatePass => Self::GatePass,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum TargetArg {
    Local,
    Nas,
    R2,
}

impl From<TargetArg> for Target {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::Local => Self::Local,
            TargetArg::Nas => Self::Nas,
            TargetArg::R2 => Self::R2,
        }
    }
}

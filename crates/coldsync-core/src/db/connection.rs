//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;
use std::time::Duration;

use super::migrations;

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database wrapper for libSQL connections
///
/// Every worker should hold its own connection from [`Database::connect`].
/// `SQLite` serializes writers, which is what makes a single-statement claim
/// exclusive across connections.
pub struct Database {
    db: LibSqlDatabase,
    conn: Connection,
    in_memory: bool,
    busy_timeout: Duration,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            in_memory: false,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        database.configure(&database.conn).await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    ///
    /// In-memory databases are private to one connection, so [`Database::connect`]
    /// hands out the shared primary connection instead of a new one.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            in_memory: true,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        database.configure(&database.conn).await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open a new configured connection to the same database.
    pub async fn connect(&self) -> Result<Connection> {
        if self.in_memory {
            return Ok(self.conn.clone());
        }
        let conn = self.db.connect()?;
        self.configure(&conn).await?;
        Ok(conn)
    }

    /// Configure `SQLite` for concurrent workers
    async fn configure(&self, conn: &Connection) -> Result<()> {
        // These pragmas return a row, so they go through `query`.
        if !self.in_memory {
            conn.query("PRAGMA journal_mode = WAL;", ()).await?;
        }
        conn.query(
            &format!(
                "PRAGMA busy_timeout = {};",
                self.busy_timeout.as_millis()
            ),
            (),
        )
        .await?;
        conn.execute("PRAGMA synchronous = NORMAL;", ()).await.ok();
        conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    pub const fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Get a reference to the primary connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

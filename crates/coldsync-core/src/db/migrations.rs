//! Database migrations

use crate::error::Result;
use crate::models::QueueKind;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

fn queue_table_statements(kind: QueueKind) -> [String; 4] {
    let table = kind.table();
    [
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                source_key TEXT NOT NULL,
                local_path TEXT NOT NULL,
                target_key TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                file_mtime INTEGER,
                required_targets INTEGER NOT NULL,
                synced_targets INTEGER NOT NULL DEFAULT 0,
                primary_location TEXT NOT NULL DEFAULT 'local',
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'uploading', 'synced', 'failed', 'skipped')),
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 5,
                last_error TEXT,
                claimed_by TEXT,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                next_retry_at INTEGER,
                UNIQUE (source, source_key),
                CHECK (retry_count <= max_retries)
            )"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_claim ON {table}(status, next_retry_at, created_at)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_source ON {table}(source, status)"),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_started ON {table}(status, started_at)"
        ),
    ]
}

/// Migration to version 1: replication queues and pool scan state
async fn migrate_v1(conn: &Connection) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    // Using a transaction for atomicity

    conn.execute("BEGIN TRANSACTION", ()).await?;

    let mut statements = vec!["CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
    .to_string()];
    for kind in QueueKind::ALL {
        statements.extend(queue_table_statements(kind));
    }
    statements.extend([
        "CREATE TABLE IF NOT EXISTS pool_sync_scan_state (
            pool_name TEXT PRIMARY KEY,
            last_scan_at INTEGER,
            files_found INTEGER NOT NULL DEFAULT 0,
            files_enqueued INTEGER NOT NULL DEFAULT 0,
            scan_duration_ms INTEGER NOT NULL DEFAULT 0,
            is_scanning INTEGER NOT NULL DEFAULT 0
        )"
        .to_string(),
        "INSERT INTO schema_version (version) VALUES (1)".to_string(),
    ]);

    for stmt in &statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: business media tables used by reconciliation
async fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS room_entry_media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            thock_number TEXT NOT NULL,
            media_type TEXT NOT NULL DEFAULT 'photo',
            cloud_synced INTEGER NOT NULL DEFAULT 0,
            r2_key TEXT
        )",
        "CREATE TABLE IF NOT EXISTS gate_pass_media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            thock_number TEXT NOT NULL,
            media_type TEXT NOT NULL DEFAULT 'photo',
            cloud_synced INTEGER NOT NULL DEFAULT 0,
            r2_key TEXT
        )",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version 2");
    Ok(())
}

/// Migration to version 3: record when a pool scan took its flag
async fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        "ALTER TABLE pool_sync_scan_state ADD COLUMN scan_started_at INTEGER",
        "INSERT INTO schema_version (version) VALUES (3)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {}", CURRENT_VERSION);
    Ok(())
}

//! Business media tables touched by replication
//!
//! The queue only reads these rows for reconciliation and flips their
//! `cloud_synced` flag once R2 holds the file.

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{MediaFile, MediaSource, NewMediaFile, QueueKind};

/// Trait for business media access (async)
#[allow(async_fn_in_trait)]
pub trait MediaRepository {
    /// Insert a media row, returning its id
    async fn insert(&self, source: MediaSource, media: &NewMediaFile) -> Result<i64>;

    /// Media rows that have no replication record yet
    async fn find_unqueued(&self, source: MediaSource, limit: usize) -> Result<Vec<MediaFile>>;

    /// Flag a media row as backed up in R2
    async fn mark_cloud_synced(&self, source: MediaSource, id: i64, r2_key: &str) -> Result<()>;

    /// Whether a media row is flagged as backed up in R2
    async fn is_cloud_synced(&self, source: MediaSource, id: i64) -> Result<bool>;
}

/// libSQL implementation of `MediaRepository`
pub struct LibSqlMediaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMediaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MediaRepository for LibSqlMediaRepository<'_> {
    async fn insert(&self, source: MediaSource, media: &NewMediaFile) -> Result<i64> {
        if media.file_path.trim().is_empty() || media.file_name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "media file_path and file_name are required".to_string(),
            ));
        }

        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO {} (file_path, file_name, file_size, thock_number, media_type)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     RETURNING id",
                    source.table()
                ),
                params![
                    media.file_path.as_str(),
                    media.file_name.as_str(),
                    media.file_size,
                    media.thock_number.as_str(),
                    media.media_type.as_str()
                ],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database("media insert returned no id".to_string()))?;
        Ok(row.get(0)?)
    }

    async fn find_unqueued(&self, source: MediaSource, limit: usize) -> Result<Vec<MediaFile>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT m.id, m.file_path, m.file_name, m.file_size, m.thock_number, m.media_type
                     FROM {media} m
                     LEFT JOIN {queue} q
                       ON q.source = ?1 AND q.source_key = CAST(m.id AS TEXT)
                     WHERE q.id IS NULL
                     ORDER BY m.id
                     LIMIT ?2",
                    media = source.table(),
                    queue = QueueKind::Media.table(),
                ),
                params![source.as_str(), limit],
            )
            .await?;

        let mut files = Vec::new();
        while let Some(row) = rows.next().await? {
            files.push(MediaFile {
                id: row.get(0)?,
                file_path: row.get(1)?,
                file_name: row.get(2)?,
                file_size: row.get(3)?,
                thock_number: row.get(4)?,
                media_type: row.get(5)?,
            });
        }
        Ok(files)
    }

    async fn mark_cloud_synced(&self, source: MediaSource, id: i64, r2_key: &str) -> Result<()> {
        let affected = self
            .conn
            .execute(
                &format!(
                    "UPDATE {} SET cloud_synced = 1, r2_key = ?2 WHERE id = ?1",
                    source.table()
                ),
                params![id, r2_key],
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotFound(format!("{source} media {id}")));
        }
        Ok(())
    }

    async fn is_cloud_synced(&self, source: MediaSource, id: i64) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT cloud_synced FROM {} WHERE id = ?1", source.table()),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? != 0),
            None => Err(Error::NotFound(format!("{source} media {id}"))),
        }
    }
}

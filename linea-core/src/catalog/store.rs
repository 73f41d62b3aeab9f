use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::sqlite::configure_connection;

use super::error::{CatalogError, CatalogResult};
use super::models::{ContentItem, ContentKind, SyncMetadata, SYNC_METADATA_ID};

const CATALOG_SCHEMA: &str = include_str!("../../../sql/catalog.sql");

#[derive(Debug, Clone)]
pub struct SqliteCatalogStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteCatalogStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteCatalogStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> CatalogResult<SqliteCatalogStore> {
        let path = self.path.ok_or(CatalogError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteCatalogStore { path, flags })
    }
}

/// Table-per-kind catalog store. The connection is opened per call so the
/// store itself stays cheap to clone across tasks.
#[derive(Debug, Clone)]
pub struct SqliteCatalogStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteCatalogStore {
    pub fn builder() -> SqliteCatalogStoreBuilder {
        SqliteCatalogStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> CatalogResult<Self> {
        SqliteCatalogStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> CatalogResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            CatalogError::Open {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| CatalogError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> CatalogResult<()> {
        let conn = self.open()?;
        conn.execute_batch(CATALOG_SCHEMA)?;
        Ok(())
    }

    pub fn count(&self, kind: ContentKind) -> CatalogResult<usize> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Inserts one batch inside a single transaction. The whole batch is
    /// the unit of retry, so a partial batch never survives a failure.
    pub fn insert_batch(&self, kind: ContentKind, items: &[ContentItem]) -> CatalogResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (
                    id, position, name, logo, url, provider_id,
                    group_title, country, tvg_id, season, episode
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                kind.table()
            ))?;
            for item in items {
                stmt.execute(params![
                    &item.id,
                    item.position,
                    &item.name,
                    &item.logo,
                    &item.url,
                    &item.provider_id,
                    &item.group_title,
                    &item.country,
                    &item.tvg_id,
                    &item.season,
                    &item.episode,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Whole-table delete, the fast purge path.
    pub fn truncate(&self, kind: ContentKind) -> CatalogResult<()> {
        let conn = self.open()?;
        conn.execute(&format!("DELETE FROM {}", kind.table()), [])?;
        Ok(())
    }

    /// Deletes at most `limit` rows and reports how many went away; the
    /// bounded fallback used when a whole-table delete is not available.
    pub fn delete_batch(&self, kind: ContentKind, limit: usize) -> CatalogResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            &format!(
                "DELETE FROM {table} WHERE rowid IN
                 (SELECT rowid FROM {table} LIMIT ?1)",
                table = kind.table()
            ),
            [limit as i64],
        )?;
        Ok(affected)
    }

    pub fn lookup_url(&self, kind: ContentKind, provider_id: &str) -> CatalogResult<Option<String>> {
        let conn = self.open()?;
        let url = conn
            .query_row(
                &format!(
                    "SELECT url FROM {} WHERE provider_id = ?1 LIMIT 1",
                    kind.table()
                ),
                [provider_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(url)
    }

    pub fn item_by_provider_id(
        &self,
        kind: ContentKind,
        provider_id: &str,
    ) -> CatalogResult<Option<ContentItem>> {
        let conn = self.open()?;
        let item = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE provider_id = ?1 LIMIT 1",
                    kind.table()
                ),
                [provider_id],
                |row| ContentItem::from_row(row),
            )
            .optional()?;
        Ok(item)
    }

    /// Every (kind, provider id, origin URL) triple, for resolver preload.
    pub fn stream_rows(&self) -> CatalogResult<Vec<(ContentKind, String, String)>> {
        let conn = self.open()?;
        let mut rows = Vec::new();
        for kind in ContentKind::all() {
            let mut stmt = conn.prepare(&format!(
                "SELECT provider_id, url FROM {}",
                kind.table()
            ))?;
            let mapped = stmt
                .query_map([], |row| {
                    Ok((kind, row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.extend(mapped);
        }
        Ok(rows)
    }

    pub fn upsert_metadata(&self, metadata: &SyncMetadata) -> CatalogResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO sync_metadata (
                id, last_sync, total_channels, total_movies, total_series,
                channels_with_logo, movies_with_logo, series_with_logo,
                template_path, template_bytes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                last_sync = excluded.last_sync,
                total_channels = excluded.total_channels,
                total_movies = excluded.total_movies,
                total_series = excluded.total_series,
                channels_with_logo = excluded.channels_with_logo,
                movies_with_logo = excluded.movies_with_logo,
                series_with_logo = excluded.series_with_logo,
                template_path = excluded.template_path,
                template_bytes = excluded.template_bytes",
            params![
                SYNC_METADATA_ID,
                metadata
                    .last_sync
                    .unwrap_or_else(Utc::now)
                    .naive_utc(),
                metadata.total_channels,
                metadata.total_movies,
                metadata.total_series,
                metadata.channels_with_logo,
                metadata.movies_with_logo,
                metadata.series_with_logo,
                &metadata.template_path,
                metadata.template_bytes,
            ],
        )?;
        Ok(())
    }

    pub fn metadata(&self) -> CatalogResult<Option<SyncMetadata>> {
        let conn = self.open()?;
        let metadata = conn
            .query_row(
                "SELECT * FROM sync_metadata WHERE id = ?1",
                [SYNC_METADATA_ID],
                |row| SyncMetadata::from_row(row),
            )
            .optional()?;
        Ok(metadata)
    }
}

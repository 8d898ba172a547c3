//! Local catalog of displayable items and the sources they came from.
//!
//! Two tables: `sources` and `catalog_items`. Items are keyed by the remote
//! id, so re-indexing overwrites metadata instead of duplicating rows.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default MIME type for items whose source reports none.
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Kind of remote origin backing a source account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourceKind {
    /// An object-storage bucket, re-listed in full on every sync.
    ObjectStorage,
    /// A photo-library account, paginated and merged incrementally.
    PhotoLibrary,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ObjectStorage => "object_storage",
            SourceKind::PhotoLibrary => "photo_library",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "object_storage" => Some(SourceKind::ObjectStorage),
            "photo_library" => Some(SourceKind::PhotoLibrary),
            _ => None,
        }
    }
}

/// A configured remote source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceAccount {
    pub id: i64,
    pub kind: SourceKind,
    /// Account email or bucket name, unique per kind.
    pub label: String,
    pub bucket_name: Option<String>,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to register a source.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub kind: SourceKind,
    pub label: String,
    pub bucket_name: Option<String>,
    pub credentials_json: String,
}

/// A displayable unit in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogItem {
    pub id: String,
    pub source_id: i64,
    /// Object name for buckets, last known base URL for photo libraries.
    pub locator: String,
    pub filename: Option<String>,
    pub mime_type: String,
    pub size_bytes: Option<i64>,
    pub creation_time: Option<DateTime<Utc>>,
    /// Overwritten on every upsert.
    pub indexed_at: DateTime<Utc>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, source_id: i64, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_id,
            locator: locator.into(),
            filename: None,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            size_bytes: None,
            creation_time: None,
            indexed_at: Utc::now(),
        }
    }

    /// Name shown under the image: the filename when known, else the locator.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.locator)
    }
}

/// Persistence operations the sync worker, resolver and slideshow need.
pub trait CatalogStore: Send + Sync {
    fn upsert(&self, item: &CatalogItem) -> Result<()>;
    /// Upsert a batch inside one transaction. Returns the number written.
    fn upsert_batch(&self, items: &[CatalogItem]) -> Result<usize>;
    fn delete_all_for_source(&self, source_id: i64) -> Result<usize>;
    /// Uniformly random item across active sources, `None` when empty.
    fn pick_random(&self) -> Result<Option<CatalogItem>>;
    fn count(&self) -> Result<u64>;
    fn count_for_source(&self, source_id: i64) -> Result<u64>;
    fn get_item(&self, id: &str) -> Result<Option<CatalogItem>>;
    fn update_locator(&self, id: &str, locator: &str) -> Result<()>;

    /// Create a source, or refresh credentials and reactivate an existing
    /// one with the same kind and label.
    fn add_source(&self, source: &NewSource) -> Result<SourceAccount>;
    fn get_source(&self, id: i64) -> Result<Option<SourceAccount>>;
    fn list_sources(&self) -> Result<Vec<SourceAccount>>;
    fn active_sources(&self) -> Result<Vec<SourceAccount>>;
    fn mark_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
    /// Deactivate a source and delete its items. Returns items removed.
    fn deactivate_source(&self, id: i64) -> Result<usize>;
    fn credentials_json(&self, id: i64) -> Result<Option<String>>;
    fn set_credentials_json(&self, id: i64, json: &str) -> Result<()>;
}

/// Run a catalog call on the blocking pool so a long write never holds up
/// a runtime worker.
pub async fn blocking<T, F>(store: &Arc<dyn CatalogStore>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn CatalogStore) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| Error::Other(format!("catalog task failed: {e}")))?
}

/// SQLite-backed catalog. One connection guarded by a mutex.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        tracing::debug!("Catalog schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("catalog connection poisoned".into()))
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sources (
            id               INTEGER PRIMARY KEY,
            kind             TEXT NOT NULL,
            label            TEXT NOT NULL,
            bucket_name      TEXT,
            credentials_json TEXT NOT NULL DEFAULT '{}',
            is_active        INTEGER NOT NULL DEFAULT 1,
            last_synced_at   TEXT,
            created_at       TEXT NOT NULL,
            UNIQUE (kind, label)
        );

        CREATE TABLE IF NOT EXISTS catalog_items (
            id            TEXT PRIMARY KEY,
            source_id     INTEGER NOT NULL,
            locator       TEXT NOT NULL,
            filename      TEXT,
            mime_type     TEXT NOT NULL,
            size_bytes    INTEGER,
            creation_time TEXT,
            indexed_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_items_source ON catalog_items(source_id);
        ",
    )?;
    Ok(())
}

const ITEM_COLUMNS: &str =
    "i.id, i.source_id, i.locator, i.filename, i.mime_type, i.size_bytes, i.creation_time, i.indexed_at";

const SOURCE_COLUMNS: &str =
    "id, kind, label, bucket_name, is_active, last_synced_at, created_at";

fn parse_time(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogItem> {
    Ok(CatalogItem {
        id: row.get(0)?,
        source_id: row.get(1)?,
        locator: row.get(2)?,
        filename: row.get(3)?,
        mime_type: row.get(4)?,
        size_bytes: row.get(5)?,
        creation_time: parse_time(row.get(6)?),
        indexed_at: parse_time(row.get(7)?).unwrap_or_else(Utc::now),
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<SourceAccount> {
    let kind: String = row.get(1)?;
    let kind = SourceKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown source kind {kind}").into(),
        )
    })?;
    Ok(SourceAccount {
        id: row.get(0)?,
        kind,
        label: row.get(2)?,
        bucket_name: row.get(3)?,
        is_active: row.get(4)?,
        last_synced_at: parse_time(row.get(5)?),
        created_at: parse_time(row.get(6)?).unwrap_or_else(Utc::now),
    })
}

fn upsert_with(conn: &Connection, item: &CatalogItem, now: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO catalog_items
            (id, source_id, locator, filename, mime_type, size_bytes, creation_time, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            source_id = excluded.source_id,
            locator = excluded.locator,
            filename = excluded.filename,
            mime_type = excluded.mime_type,
            size_bytes = excluded.size_bytes,
            creation_time = excluded.creation_time,
            indexed_at = excluded.indexed_at",
        params![
            item.id,
            item.source_id,
            item.locator,
            item.filename,
            item.mime_type,
            item.size_bytes,
            item.creation_time.map(|t| t.to_rfc3339()),
            now,
        ],
    )
}

impl CatalogStore for SqliteCatalog {
    fn upsert(&self, item: &CatalogItem) -> Result<()> {
        let conn = self.conn()?;
        upsert_with(&conn, item, &Utc::now().to_rfc3339())?;
        Ok(())
    }

    fn upsert_batch(&self, items: &[CatalogItem]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for item in items {
            upsert_with(&tx, item, &now)?;
        }
        tx.commit()?;
        Ok(items.len())
    }

    fn delete_all_for_source(&self, source_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM catalog_items WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(removed)
    }

    fn pick_random(&self) -> Result<Option<CatalogItem>> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM catalog_items i
             JOIN sources s ON s.id = i.source_id
             WHERE s.is_active = 1",
            [],
            |row| row.get(0),
        )?;
        if total == 0 {
            return Ok(None);
        }

        let offset = rand::thread_rng().gen_range(0..total);
        let item = conn
            .query_row(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM catalog_items i
                     JOIN sources s ON s.id = i.source_id
                     WHERE s.is_active = 1
                     ORDER BY i.rowid
                     LIMIT 1 OFFSET ?1"
                ),
                params![offset],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM catalog_items", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    fn count_for_source(&self, source_id: i64) -> Result<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM catalog_items WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn get_item(&self, id: &str) -> Result<Option<CatalogItem>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM catalog_items i WHERE i.id = ?1"),
                params![id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    fn update_locator(&self, id: &str, locator: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE catalog_items SET locator = ?2 WHERE id = ?1",
            params![id, locator],
        )?;
        Ok(())
    }

    fn add_source(&self, source: &NewSource) -> Result<SourceAccount> {
        let conn = self.conn()?;
        let id: i64 = conn.query_row(
            "INSERT INTO sources (kind, label, bucket_name, credentials_json, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(kind, label) DO UPDATE SET
                bucket_name = excluded.bucket_name,
                credentials_json = excluded.credentials_json,
                is_active = 1
             RETURNING id",
            params![
                source.kind.as_str(),
                source.label,
                source.bucket_name,
                source.credentials_json,
                Utc::now().to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        let account = conn.query_row(
            &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"),
            params![id],
            source_from_row,
        )?;
        tracing::info!("Registered {} source {} ({})", account.kind.as_str(), account.id, account.label);
        Ok(account)
    }

    fn get_source(&self, id: i64) -> Result<Option<SourceAccount>> {
        let conn = self.conn()?;
        let source = conn
            .query_row(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"),
                params![id],
                source_from_row,
            )
            .optional()?;
        Ok(source)
    }

    fn list_sources(&self) -> Result<Vec<SourceAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id"))?;
        let rows = stmt.query_map([], source_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn active_sources(&self) -> Result<Vec<SourceAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE is_active = 1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([], source_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn mark_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sources SET last_synced_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(Error::UnknownSource(id));
        }
        Ok(())
    }

    fn deactivate_source(&self, id: i64) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute("UPDATE sources SET is_active = 0 WHERE id = ?1", params![id])?;
        if updated == 0 {
            return Err(Error::UnknownSource(id));
        }
        let removed = tx.execute("DELETE FROM catalog_items WHERE source_id = ?1", params![id])?;
        tx.commit()?;
        tracing::info!("Deactivated source {}, removed {} items", id, removed);
        Ok(removed)
    }

    fn credentials_json(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn()?;
        let json = conn
            .query_row(
                "SELECT credentials_json FROM sources WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    fn set_credentials_json(&self, id: i64, json: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sources SET credentials_json = ?2 WHERE id = ?1",
            params![id, json],
        )?;
        Ok(())
    }
}

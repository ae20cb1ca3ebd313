// Series Store
// SQLite-backed keyed document collections
//
// Every series lives in one table keyed by (collection, key). Documents are
// stored as JSON next to an indexed time column so reads come back ordered.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::types::SeriesRecord;

// =============================================================================
// Documents and Filters
// =============================================================================

/// A stored record: unique key, optional scope, ordering time and JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    pub scope: Option<String>,
    pub time: i64,
    pub body: serde_json::Value,
}

impl Document {
    pub fn from_record<R: SeriesRecord>(record: &R) -> Result<Self, StoreError> {
        Ok(Document {
            key: record.key(),
            scope: record.scope().map(str::to_string),
            time: record.time(),
            body: serde_json::to_value(record)?,
        })
    }

    pub fn decode<R: SeriesRecord>(&self) -> Result<R, StoreError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Selects documents of one collection, optionally narrowed by scope and a
/// half-open time range `[since, until)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesFilter {
    pub collection: String,
    pub scope: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

impl SeriesFilter {
    pub fn collection(collection: impl Into<String>) -> Self {
        SeriesFilter {
            collection: collection.into(),
            scope: None,
            since: None,
            until: None,
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: i64) -> Self {
        self.until = Some(until);
        self
    }
}

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

// =============================================================================
// Store Contract
// =============================================================================

/// Keyed document collections ordered by time
///
/// Implementations must make each `upsert` atomic per document.
pub trait SeriesStore {
    /// Most recent document matching the filter, `None` when nothing matches
    fn find_latest(&self, filter: &SeriesFilter) -> Result<Option<Document>, StoreError>;

    /// All documents matching the filter, ascending by time then key
    fn find_range(&self, filter: &SeriesFilter) -> Result<Vec<Document>, StoreError>;

    /// Insert the document or overwrite every field of the one with its key
    fn upsert(&self, collection: &str, doc: &Document) -> Result<Upsert, StoreError>;
}

/// Typed access on top of any [`SeriesStore`]
pub trait SeriesStoreExt: SeriesStore {
    fn latest<R: SeriesRecord>(&self, filter: &SeriesFilter) -> Result<Option<R>, StoreError> {
        self.find_latest(filter)?.map(|doc| doc.decode()).transpose()
    }

    fn range<R: SeriesRecord>(&self, filter: &SeriesFilter) -> Result<Vec<R>, StoreError> {
        self.find_range(filter)?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    fn put<R: SeriesRecord>(&self, collection: &str, record: &R) -> Result<Upsert, StoreError> {
        self.upsert(collection, &Document::from_record(record)?)
    }
}

impl<S: SeriesStore + ?Sized> SeriesStoreExt for S {}

// =============================================================================
// SQLite Implementation
// =============================================================================

const SELECT_RANGE: &str = "SELECT key, scope, time, body FROM series
     WHERE collection = ?1
       AND (?2 IS NULL OR scope = ?2)
       AND (?3 IS NULL OR time >= ?3)
       AND (?4 IS NULL OR time < ?4)
     ORDER BY time ASC, key ASC";

const SELECT_LATEST: &str = "SELECT key, scope, time, body FROM series
     WHERE collection = ?1
       AND (?2 IS NULL OR scope = ?2)
       AND (?3 IS NULL OR time >= ?3)
       AND (?4 IS NULL OR time < ?4)
     ORDER BY time DESC, key DESC
     LIMIT 1";

pub struct SqliteSeriesStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSeriesStore {
    /// Open (or create) a store at the given path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;

        // WAL lets readers proceed while a sync is writing
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self::with_connection(conn)?;
        info!("Series store opened: {}", db_path.display());
        Ok(store)
    }

    /// Private in-memory store, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS series (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                scope TEXT,
                time INTEGER NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection, key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_series_collection_time
                ON series(collection, scope, time)",
            [],
        )?;

        debug!("Series schema created/verified");
        Ok(())
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM series WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

type RawRow = (String, Option<String>, i64, String);

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_document((key, scope, time, body): RawRow) -> Result<Document, StoreError> {
    Ok(Document {
        key,
        scope,
        time,
        body: serde_json::from_str(&body)?,
    })
}

impl SeriesStore for SqliteSeriesStore {
    fn find_latest(&self, filter: &SeriesFilter) -> Result<Option<Document>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(SELECT_LATEST)?;

        let row = stmt
            .query_row(
                params![filter.collection, filter.scope, filter.since, filter.until],
                row_to_document,
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(into_document(raw)?)),
            None => {
                debug!("No documents in {} for {:?}", filter.collection, filter);
                Ok(None)
            }
        }
    }

    fn find_range(&self, filter: &SeriesFilter) -> Result<Vec<Document>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(SELECT_RANGE)?;

        let rows = stmt
            .query_map(
                params![filter.collection, filter.scope, filter.since, filter.until],
                row_to_document,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let docs = rows
            .into_iter()
            .map(into_document)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Loaded {} documents from {}", docs.len(), filter.collection);
        Ok(docs)
    }

    fn upsert(&self, collection: &str, doc: &Document) -> Result<Upsert, StoreError> {
        let body = serde_json::to_string(&doc.body)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<(Option<String>, i64, String)> = tx
            .query_row(
                "SELECT scope, time, body FROM series WHERE collection = ?1 AND key = ?2",
                params![collection, doc.key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => Upsert::Inserted,
            Some((scope, time, stored))
                if scope == doc.scope
                    && time == doc.time
                    && serde_json::from_str::<serde_json::Value>(&stored)? == doc.body =>
            {
                Upsert::Unchanged
            }
            Some(_) => Upsert::Updated,
        };

        if outcome != Upsert::Unchanged {
            tx.execute(
                "INSERT INTO series (collection, key, scope, time, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
                 ON CONFLICT(collection, key) DO UPDATE SET
                    scope = excluded.scope,
                    time = excluded.time,
                    body = excluded.body,
                    updated_at = CURRENT_TIMESTAMP",
                params![collection, doc.key, doc.scope, doc.time, body],
            )?;
        }

        tx.commit()?;
        Ok(outcome)
    }
}

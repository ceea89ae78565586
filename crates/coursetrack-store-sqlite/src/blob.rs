//! Attachment store: one record per owner id, holding that owner's complete
//! item list as JSON.
//!
//! The store owns a single pooled connection. It is opened lazily on first
//! use and the open itself is memoized: callers arriving while an open is in
//! flight await the same [`Shared`] future instead of starting their own.
//! When the connection reports that it has closed, the slot is cleared and
//! the next operation opens a fresh one.
//!
//! There is no per-owner locking. Two concurrent `save` calls for the same
//! owner race and the last commit wins; items are never merged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use coursetrack_core::{AttachmentItem, AttachmentRecord};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::executor::{DbExecutor, DbExecutorError};

pub const ATTACHMENT_DB_FILE: &str = "attachments.sqlite3";
pub const ATTACHMENT_DB_VERSION: i64 = 1;

const CREATE_ATTACHMENTS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS attachments (
  owner_id TEXT PRIMARY KEY,
  items_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("failed to open attachment database: {0}")]
    Open(String),
    #[error("attachment database version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },
    #[error("attachment database connection closed")]
    Closed,
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("internal executor error: {0}")]
    Executor(String),
}

impl From<DbExecutorError> for BlobStoreError {
    fn from(e: DbExecutorError) -> Self {
        match e {
            DbExecutorError::Database(db_err) => BlobStoreError::Sqlite(db_err),
            DbExecutorError::ChannelClosed => BlobStoreError::Closed,
            DbExecutorError::TypeMismatch => BlobStoreError::Executor(e.to_string()),
        }
    }
}

type OpenOutcome = Result<Arc<DbExecutor>, String>;
type PendingOpen = Shared<BoxFuture<'static, OpenOutcome>>;

enum ConnectionSlot {
    Closed,
    Opening(PendingOpen),
    Open(Arc<DbExecutor>),
}

pub struct BlobStore {
    path: PathBuf,
    slot: Mutex<ConnectionSlot>,
    opens: AtomicUsize,
}

impl BlobStore {
    /// Create a store for the database at `path`. Nothing is opened yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            slot: Mutex::new(ConnectionSlot::Closed),
            opens: AtomicUsize::new(0),
        }
    }

    /// Store backed by [`ATTACHMENT_DB_FILE`] inside `data_dir`.
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(ATTACHMENT_DB_FILE))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of opens started over the store's lifetime.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Replace every item stored for `owner_id`.
    ///
    /// # Errors
    /// Propagates open, serialization, and write failures. Nothing is
    /// partially written on error.
    pub async fn save(&self, owner_id: &str, items: &[AttachmentItem]) -> Result<(), BlobStoreError> {
        let items_json = serde_json::to_string(items)?;
        let owner = owner_id.to_string();
        let updated_at = Utc::now().to_rfc3339();

        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO attachments (owner_id, items_json, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(owner_id) DO UPDATE SET
                   items_json = excluded.items_json,
                   updated_at = excluded.updated_at",
                params![owner, items_json, updated_at],
            )
        })
        .await?;

        tracing::debug!("Saved {} attachment(s) for owner '{}'", items.len(), owner_id);
        Ok(())
    }

    /// Items stored for `owner_id`; an unknown owner yields an empty list.
    ///
    /// # Errors
    /// Returns an error when the database cannot be read or the stored JSON
    /// cannot be decoded.
    pub async fn load(&self, owner_id: &str) -> Result<Vec<AttachmentItem>, BlobStoreError> {
        let owner = owner_id.to_string();
        let raw: Option<String> = self
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT items_json FROM attachments WHERE owner_id = ?1",
                    [owner],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Remove the record for `owner_id`. Best effort: failures are logged and
    /// swallowed, and a missing record is not an error.
    pub async fn delete(&self, owner_id: &str) {
        let owner = owner_id.to_string();
        let result = self
            .with_connection(move |conn| {
                conn.execute("DELETE FROM attachments WHERE owner_id = ?1", [owner])
            })
            .await;

        if let Err(err) = result {
            tracing::warn!("Failed to delete attachments for owner '{}': {}", owner_id, err);
        }
    }

    /// Every owner's items. No ordering across owners is implied.
    ///
    /// # Errors
    /// Returns an error when the database cannot be read or a record cannot
    /// be decoded.
    pub async fn load_all(&self) -> Result<HashMap<String, Vec<AttachmentItem>>, BlobStoreError> {
        let rows: Vec<(String, String)> = self
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT owner_id, items_json FROM attachments")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut by_owner = HashMap::with_capacity(rows.len());
        for (owner_id, items_json) in rows {
            let record = AttachmentRecord {
                owner_id,
                items: serde_json::from_str(&items_json)?,
            };
            by_owner.insert(record.owner_id, record.items);
        }
        Ok(by_owner)
    }

    /// Close the pooled connection. The next operation re-opens it.
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, ConnectionSlot::Closed) {
            ConnectionSlot::Open(conn) => {
                conn.close();
                tracing::debug!("Closed attachment database {}", self.path.display());
            }
            ConnectionSlot::Opening(pending) => {
                // Let the in-flight open finish; its callers still await it.
                *slot = ConnectionSlot::Opening(pending);
            }
            ConnectionSlot::Closed => {}
        }
    }

    async fn with_connection<F, T>(&self, op: F) -> Result<T, BlobStoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection().await?;
        match conn.run(op).await {
            Ok(value) => Ok(value),
            Err(DbExecutorError::ChannelClosed) => {
                self.invalidate(&conn);
                Err(BlobStoreError::Closed)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Pooled connection, opening it if needed. Only one open is ever in
    /// flight; concurrent callers share it.
    async fn connection(&self) -> Result<Arc<DbExecutor>, BlobStoreError> {
        let pending = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, ConnectionSlot::Closed) {
                ConnectionSlot::Open(conn) if !conn.is_closed() => {
                    *slot = ConnectionSlot::Open(Arc::clone(&conn));
                    return Ok(conn);
                }
                ConnectionSlot::Opening(pending) => {
                    *slot = ConnectionSlot::Opening(pending.clone());
                    pending
                }
                ConnectionSlot::Open(_) | ConnectionSlot::Closed => {
                    let pending = self.begin_open();
                    *slot = ConnectionSlot::Opening(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.clone().await;

        let mut slot = self.slot.lock();
        let still_current =
            matches!(&*slot, ConnectionSlot::Opening(current) if current.ptr_eq(&pending));

        match outcome {
            Ok(conn) => {
                if still_current {
                    *slot = ConnectionSlot::Open(Arc::clone(&conn));
                }
                Ok(conn)
            }
            Err(message) => {
                if still_current {
                    *slot = ConnectionSlot::Closed;
                }
                tracing::error!("Failed to open attachment database: {}", message);
                Err(BlobStoreError::Open(message))
            }
        }
    }

    fn begin_open(&self) -> PendingOpen {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.path.clone();
        tracing::info!(
            "Opening attachment database {} (open #{})",
            path.display(),
            attempt
        );

        async move {
            let conn = tokio::task::spawn_blocking(move || open_connection(&path))
                .await
                .map_err(|err| format!("open task failed: {err}"))?
                .map_err(|err| err.to_string())?;
            Ok::<_, String>(Arc::new(DbExecutor::new(conn)))
        }
        .boxed()
        .shared()
    }

    fn invalidate(&self, stale: &Arc<DbExecutor>) {
        let mut slot = self.slot.lock();
        if matches!(&*slot, ConnectionSlot::Open(current) if Arc::ptr_eq(current, stale)) {
            *slot = ConnectionSlot::Closed;
            tracing::warn!("Attachment database connection closed; will reopen on next use");
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection, BlobStoreError> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;",
    )?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > ATTACHMENT_DB_VERSION {
        return Err(BlobStoreError::UnsupportedVersion {
            found: version,
            supported: ATTACHMENT_DB_VERSION,
        });
    }

    conn.execute_batch(CREATE_ATTACHMENTS_SQL)?;
    if version < ATTACHMENT_DB_VERSION {
        conn.pragma_update(None, "user_version", ATTACHMENT_DB_VERSION)?;
    }

    Ok(conn)
}

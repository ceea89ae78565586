//! Synchronous durable key-value store for small JSON values (catalog,
//! completed ids, history, backup timestamp).
//!
//! Reads are forgiving: a value that no longer parses is treated as absent so
//! a damaged entry can never block startup. Writes enforce a byte quota over
//! all stored keys and values.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const KEY_COURSES: &str = "courses";
pub const KEY_COMPLETED_TASKS: &str = "completedTasks";
pub const KEY_COMPLETION_HISTORY: &str = "completionHistory";
pub const KEY_LAST_BACKUP: &str = "lastBackupDate";

pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

const CREATE_KV_SQL: &str = r"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum KvError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage quota exceeded: writing {key} needs {required} bytes, quota is {quota}")]
    QuotaExceeded {
        key: String,
        required: usize,
        quota: usize,
    },
}

pub struct KvStore {
    conn: Mutex<Connection>,
    quota_bytes: usize,
}

impl KvStore {
    /// Open or create the store at `path`.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, KvError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::from_connection(conn)
    }

    /// # Errors
    /// Returns an error when the in-memory database cannot be initialized.
    pub fn open_in_memory() -> Result<Self, KvError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, KvError> {
        conn.execute_batch(CREATE_KV_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes: DEFAULT_QUOTA_BYTES,
        })
    }

    #[must_use]
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    #[must_use]
    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    /// Read and decode `key`. Undecodable values read as `None`.
    ///
    /// # Errors
    /// Returns an error only when the underlying query fails.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KvError> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!("Ignoring unparsable value for key '{}': {}", key, err);
                Ok(None)
            }
        }
    }

    /// Like [`KvStore::get_json`] but never fails: any problem yields the default.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.get_json(key) {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("Failed to read key '{}', using default: {}", key, err);
                T::default()
            }
        }
    }

    /// Serialize and store `value` under `key`.
    ///
    /// # Errors
    /// Returns [`KvError::QuotaExceeded`] when the write would push the store
    /// past its quota; stored data is left untouched in that case.
    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), KvError> {
        let raw = serde_json::to_string(value)?;
        self.write_all(&[(key, raw)])
    }

    /// Store several values in one transaction. The quota is checked against
    /// the combined size; either every key is written or none is.
    ///
    /// # Errors
    /// Returns [`KvError::QuotaExceeded`] when the batch does not fit, or the
    /// SQLite error that aborted the transaction.
    pub fn set_json_many(&self, entries: &[(&str, Value)]) -> Result<(), KvError> {
        let raw = entries
            .iter()
            .map(|(key, value)| Ok((*key, serde_json::to_string(value)?)))
            .collect::<Result<Vec<_>, KvError>>()?;
        self.write_all(&raw)
    }

    fn write_all(&self, entries: &[(&str, String)]) -> Result<(), KvError> {
        // Last occurrence of a repeated key wins, as it would sequentially.
        let batch: BTreeMap<&str, &str> = entries
            .iter()
            .map(|(key, raw)| (*key, raw.as_str()))
            .collect();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut stored: i64 = tx.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv",
            [],
            |row| row.get(0),
        )?;
        for key in batch.keys() {
            let replaced: Option<i64> = tx
                .query_row(
                    "SELECT LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))
                     FROM kv WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?;
            stored -= replaced.unwrap_or(0);
        }

        let required = batch
            .iter()
            .map(|(key, raw)| key.len().saturating_add(raw.len()))
            .fold(
                usize::try_from(stored).unwrap_or(usize::MAX),
                usize::saturating_add,
            );

        if required > self.quota_bytes {
            let keys: Vec<&str> = batch.keys().copied().collect();
            return Err(KvError::QuotaExceeded {
                key: keys.join(", "),
                required,
                quota: self.quota_bytes,
            });
        }

        for (key, raw) in &batch {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, raw],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the delete statement fails.
    pub fn remove(&self, key: &str) -> Result<bool, KvError> {
        let removed = self.conn.lock().execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    /// # Errors
    /// Returns an error when the keys cannot be listed.
    pub fn keys(&self) -> Result<Vec<String>, KvError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key ASC")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> KvStore {
        KvStore::open_in_memory().unwrap_or_else(|err| panic!("store should open: {err}"))
    }

    #[test]
    fn round_trips_json_values() {
        let kv = store();
        let ids = vec!["a".to_string(), "b".to_string()];
        kv.set_json(KEY_COMPLETED_TASKS, &ids)
            .unwrap_or_else(|err| panic!("write should succeed: {err}"));

        let loaded: Option<Vec<String>> = kv
            .get_json(KEY_COMPLETED_TASKS)
            .unwrap_or_else(|err| panic!("read should succeed: {err}"));
        assert_eq!(loaded, Some(ids));
    }

    #[test]
    fn missing_key_reads_as_none() {
        let kv = store();
        let loaded: Option<Vec<String>> = kv
            .get_json("nope")
            .unwrap_or_else(|err| panic!("read should succeed: {err}"));
        assert_eq!(loaded, None);
    }

    #[test]
    fn unparsable_value_falls_back_to_default() {
        let kv = store();
        kv.conn
            .lock()
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)",
                params![KEY_COMPLETION_HISTORY, "{not json"],
            )
            .unwrap_or_else(|err| panic!("raw insert should succeed: {err}"));

        let history: BTreeMap<String, String> = kv.load_or_default(KEY_COMPLETION_HISTORY);
        assert!(history.is_empty());
    }

    #[test]
    fn wrong_shape_falls_back_to_default() {
        let kv = store();
        kv.set_json(KEY_COMPLETED_TASKS, &42)
            .unwrap_or_else(|err| panic!("write should succeed: {err}"));
        let ids: Vec<String> = kv.load_or_default(KEY_COMPLETED_TASKS);
        assert!(ids.is_empty());
    }

    #[test]
    fn quota_rejects_oversized_writes_and_keeps_old_value() {
        let kv = store().with_quota(64);
        kv.set_json("k", "small")
            .unwrap_or_else(|err| panic!("small write should succeed: {err}"));

        let big = "x".repeat(100);
        let err = match kv.set_json("k", &big) {
            Ok(()) => panic!("oversized write should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, KvError::QuotaExceeded { quota: 64, .. }));

        let kept: Option<String> = kv
            .get_json("k")
            .unwrap_or_else(|err| panic!("read should succeed: {err}"));
        assert_eq!(kept.as_deref(), Some("small"));
    }

    #[test]
    fn overwriting_a_key_does_not_double_count() {
        let kv = store().with_quota(40);
        let value = "y".repeat(20);
        for _ in 0..3 {
            kv.set_json("k", &value)
                .unwrap_or_else(|err| panic!("rewrite should fit: {err}"));
        }
    }

    #[test]
    fn batch_is_all_or_nothing_under_quota() {
        let kv = store().with_quota(60);
        let err = match kv.set_json_many(&[
            ("a", json!("fits on its own")),
            ("b", json!("x".repeat(50))),
        ]) {
            Ok(()) => panic!("oversized batch should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, KvError::QuotaExceeded { quota: 60, .. }));
        assert!(kv.keys().unwrap_or_else(|err| panic!("keys: {err}")).is_empty());

        kv.set_json_many(&[("a", json!(1)), ("b", json!([2, 3]))])
            .unwrap_or_else(|err| panic!("small batch should fit: {err}"));
        let b: Option<Vec<u32>> = kv
            .get_json("b")
            .unwrap_or_else(|err| panic!("read should succeed: {err}"));
        assert_eq!(b, Some(vec![2, 3]));
    }

    #[test]
    fn batch_rewrite_does_not_double_count() {
        let kv = store().with_quota(40);
        for _ in 0..3 {
            kv.set_json_many(&[("a", json!("y".repeat(10))), ("b", json!("z".repeat(10)))])
                .unwrap_or_else(|err| panic!("rewrite should fit: {err}"));
        }
    }

    #[test]
    fn remove_and_list_keys() {
        let kv = store();
        kv.set_json("b", &1).unwrap_or_else(|err| panic!("write: {err}"));
        kv.set_json("a", &2).unwrap_or_else(|err| panic!("write: {err}"));

        assert_eq!(
            kv.keys().unwrap_or_else(|err| panic!("keys: {err}")),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(kv.remove("a").unwrap_or_else(|err| panic!("remove: {err}")));
        assert!(!kv.remove("a").unwrap_or_else(|err| panic!("remove: {err}")));
    }
}

//! Tracker session: the ledger and course catalog hydrated from the
//! key-value store, kept durable through two debounced autosave pipelines.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Offset, TimeZone, Utc};
use coursetrack_core::{
    analyze, parse_backup, weekly_activity, BackupDocument, CompletionHistory, CompletionLedger,
    CoreError, ExpiringCache, LedgerSnapshot, ShapeValidator, StreakSummary, TaskId,
    ToggleOutcome, UndoEntry, DEFAULT_UNDO_LIMIT,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::autosave::AutoSavePipeline;
use crate::error::AppError;
use crate::kv::{
    KvError, KvStore, KEY_COMPLETED_TASKS, KEY_COMPLETION_HISTORY, KEY_COURSES, KEY_LAST_BACKUP,
};

const STATS_TTL_SECS: i64 = 60;

/// Ledger revision, calendar date of `now`, and its UTC offset in seconds.
type StatsKey = (u64, NaiveDate, i32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub autosave_delay: Duration,
    pub undo_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_delay: Duration::from_millis(1000),
            undo_limit: DEFAULT_UNDO_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    #[serde(flatten)]
    pub summary: StreakSummary,
    pub completed_count: usize,
    /// Completions per day, Sunday first, for the week containing `now`.
    pub weekly_activity: [usize; 7],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub completed_tasks: usize,
    pub history_entries: usize,
    pub courses: usize,
}

pub struct TrackerSession {
    kv: Arc<KvStore>,
    ledger: Mutex<CompletionLedger>,
    catalog: Mutex<Value>,
    stats: Mutex<ExpiringCache<StatsKey, SessionStats>>,
    ledger_autosave: AutoSavePipeline<LedgerSnapshot>,
    catalog_autosave: AutoSavePipeline<Value>,
}

impl TrackerSession {
    /// Hydrate from `kv` and start autosaving. Stored values that fail to
    /// parse are treated as absent. Must be called inside a tokio runtime.
    pub fn open(kv: Arc<KvStore>, config: &SessionConfig) -> Self {
        let completed: Vec<TaskId> = kv.load_or_default(KEY_COMPLETED_TASKS);
        let history: CompletionHistory = kv.load_or_default(KEY_COMPLETION_HISTORY);
        let catalog: Value = kv
            .load_or_default::<Option<Value>>(KEY_COURSES)
            .unwrap_or_else(|| Value::Array(Vec::new()));

        let mut ledger = CompletionLedger::with_undo_limit(config.undo_limit);
        ledger.hydrate_tasks(completed, history);
        tracing::info!(
            "Session opened with {} completed tasks",
            ledger.completed_count()
        );

        let ledger_store = Arc::clone(&kv);
        let ledger_autosave = AutoSavePipeline::spawn(
            "ledger",
            ledger.snapshot(),
            config.autosave_delay,
            move |snapshot: &LedgerSnapshot| write_snapshot(&ledger_store, snapshot),
        );

        let catalog_store = Arc::clone(&kv);
        let catalog_autosave = AutoSavePipeline::spawn(
            "catalog",
            catalog.clone(),
            config.autosave_delay,
            move |courses: &Value| catalog_store.set_json(KEY_COURSES, courses),
        );

        Self {
            kv,
            ledger: Mutex::new(ledger),
            catalog: Mutex::new(catalog),
            stats: Mutex::new(ExpiringCache::new(chrono::Duration::seconds(STATS_TTL_SECS))),
            ledger_autosave,
            catalog_autosave,
        }
    }

    pub fn toggle_task(&self, id: &str) -> ToggleOutcome {
        let mut ledger = self.ledger.lock();
        let outcome = ledger.toggle_task(id);
        self.ledger_autosave.update(ledger.snapshot());
        outcome
    }

    /// Revert the most recent toggle. `None` when there is nothing to undo.
    pub fn undo(&self) -> Option<UndoEntry> {
        let mut ledger = self.ledger.lock();
        let reverted = ledger.undo()?;
        self.ledger_autosave.update(ledger.snapshot());
        Some(reverted)
    }

    /// # Errors
    /// Returns [`CoreError::HistoryInUse`] when `id` is currently done.
    pub fn purge_history(&self, id: &str) -> Result<bool, CoreError> {
        let mut ledger = self.ledger.lock();
        let removed = ledger.purge_history(id)?;
        if removed {
            self.ledger_autosave.update(ledger.snapshot());
        }
        Ok(removed)
    }

    #[must_use]
    pub fn is_done(&self, id: &str) -> bool {
        self.ledger.lock().is_done(id)
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.lock().snapshot()
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.ledger.lock().undo_depth()
    }

    pub fn set_catalog(&self, courses: Value) {
        let mut catalog = self.catalog.lock();
        *catalog = courses;
        self.catalog_autosave.update(catalog.clone());
    }

    #[must_use]
    pub fn catalog(&self) -> Value {
        self.catalog.lock().clone()
    }

    /// Streak, weekly count and per-day activity as of `now`, memoized per
    /// ledger revision, calendar day and UTC offset.
    pub fn stats<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> SessionStats {
        let ledger = self.ledger.lock();
        let key = (
            ledger.revision(),
            now.date_naive(),
            now.offset().fix().local_minus_utc(),
        );
        let now_utc = now.with_timezone(&Utc);

        let mut cache = self.stats.lock();
        if let Some(hit) = cache.get(&key, now_utc) {
            return hit.clone();
        }

        let stats = SessionStats {
            summary: analyze(ledger.history(), now),
            completed_count: ledger.completed_count(),
            weekly_activity: weekly_activity(ledger.history(), now),
        };
        cache.purge_expired(now_utc);
        cache.insert(key, stats.clone(), now_utc);
        stats
    }

    #[must_use]
    pub fn last_backup(&self) -> Option<DateTime<Utc>> {
        self.kv.load_or_default(KEY_LAST_BACKUP)
    }

    /// Replace ledger and catalog with the contents of a backup document.
    /// Autosave is suspended while both are swapped, then fed the new state.
    ///
    /// # Errors
    /// Returns a validation [`AppError`] when the document is rejected; the
    /// session is left untouched in that case.
    pub fn import(&self, raw: &str) -> Result<ImportSummary, AppError> {
        let imported = parse_backup(raw, &ShapeValidator).map_err(|err| {
            tracing::warn!("Rejected backup import: {}", err);
            AppError::from(err)
        })?;

        let summary = ImportSummary {
            completed_tasks: imported.completed.len(),
            history_entries: imported.history.len(),
            courses: imported.courses.as_array().map_or(0, Vec::len),
        };

        let mut ledger = self.ledger.lock();
        let mut catalog = self.catalog.lock();
        self.ledger_autosave.set_enabled(false);
        self.catalog_autosave.set_enabled(false);

        ledger.hydrate_tasks(imported.completed, imported.history);
        *catalog = imported.courses;

        self.ledger_autosave.set_enabled(true);
        self.catalog_autosave.set_enabled(true);
        self.ledger_autosave.update(ledger.snapshot());
        self.catalog_autosave.update(catalog.clone());

        tracing::info!(
            "Imported {} completed tasks and {} courses",
            summary.completed_tasks,
            summary.courses
        );
        Ok(summary)
    }

    /// Build a backup of the current state and record `now` as the last
    /// backup time.
    ///
    /// # Errors
    /// Returns an [`AppError`] when the backup timestamp cannot be stored.
    pub fn export(&self, now: DateTime<Utc>) -> Result<BackupDocument, AppError> {
        let document = {
            let ledger = self.ledger.lock();
            let catalog = self.catalog.lock();
            BackupDocument::new(catalog.clone(), &ledger.snapshot(), now)
        };
        self.kv.set_json(KEY_LAST_BACKUP, &now)?;
        Ok(document)
    }

    /// Write any pending edits now. Returns `false` if a write failed.
    pub async fn flush(&self) -> bool {
        let ledger_saved = self.ledger_autosave.flush().await;
        let catalog_saved = self.catalog_autosave.flush().await;
        ledger_saved && catalog_saved
    }

    /// Stop both pipelines. Unflushed edits are discarded; returns `true`
    /// when something was dropped.
    pub async fn shutdown(self) -> bool {
        let ledger_dropped = self.ledger_autosave.shutdown().await.is_some();
        let catalog_dropped = self.catalog_autosave.shutdown().await.is_some();
        ledger_dropped || catalog_dropped
    }
}

/// Both ledger keys go out in one transaction so a done id is never stored
/// without its history.
fn write_snapshot(kv: &KvStore, snapshot: &LedgerSnapshot) -> Result<(), KvError> {
    kv.set_json_many(&[
        (KEY_COMPLETED_TASKS, serde_json::to_value(&snapshot.completed)?),
        (KEY_COMPLETION_HISTORY, serde_json::to_value(&snapshot.history)?),
    ])
}

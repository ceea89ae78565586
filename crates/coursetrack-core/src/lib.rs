pub mod attachment;
pub mod autosave;
pub mod backup;
pub mod cache;
pub mod ledger;
pub mod streak;

pub use attachment::{AttachmentItem, AttachmentRecord};
pub use autosave::{DebounceState, Debouncer, Transition};
pub use backup::{
    parse_backup, BackupDocument, BackupError, DocumentValidator, ImportedState, ShapeValidator,
    ValidationError, BACKUP_VERSION,
};
pub use cache::{CacheEntry, ExpiringCache};
pub use ledger::{
    CompletionHistory, CompletionLedger, LedgerSnapshot, TaskId, ToggleOutcome, UndoEntry,
    DEFAULT_UNDO_LIMIT,
};
pub use streak::{analyze, weekly_activity, StreakSummary};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("task {0} is marked done; its history cannot be purged")]
    HistoryInUse(TaskId),
}

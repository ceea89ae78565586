//! SQLite-backed persistence for the course tracker: the synchronous
//! key-value store, the pooled attachment store, debounced autosave, and the
//! session that ties them to the in-memory ledger.

pub mod autosave;
pub mod blob;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod kv;
pub mod notes;
pub mod session;

pub use autosave::AutoSavePipeline;
pub use blob::{BlobStore, BlobStoreError, ATTACHMENT_DB_FILE, ATTACHMENT_DB_VERSION};
pub use error::{AppError, ErrorCategory, ErrorCode};
pub use executor::{DbExecutor, DbExecutorError};
pub use ingest::{read_file_base64, FileReadError, ReadProgress, MAX_ATTACHMENT_BYTES};
pub use kv::{
    KvError, KvStore, DEFAULT_QUOTA_BYTES, KEY_COMPLETED_TASKS, KEY_COMPLETION_HISTORY,
    KEY_COURSES, KEY_LAST_BACKUP,
};
pub use notes::NotesCache;
pub use session::{ImportSummary, SessionConfig, SessionStats, TrackerSession};

//! Per-owner view over the attachment store.
//!
//! Mutations are read-modify-write against [`BlobStore`]. The local copy is
//! published through a `watch` channel and only changes after the store
//! confirmed the write; failures set an error flag instead of propagating.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use coursetrack_core::AttachmentItem;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::blob::BlobStore;
use crate::error::AppError;
use crate::ingest::{read_file_base64, FileReadError, ReadProgress};

pub struct NotesCache {
    store: Arc<BlobStore>,
    owner_id: String,
    items: watch::Sender<Vec<AttachmentItem>>,
    error: Mutex<Option<AppError>>,
}

impl NotesCache {
    /// Load the current items for `owner_id`. A failed load leaves the cache
    /// empty with the error flag set.
    pub async fn load(store: Arc<BlobStore>, owner_id: impl Into<String>) -> Self {
        let owner_id = owner_id.into();
        let (items, error) = match store.load(&owner_id).await {
            Ok(items) => (items, None),
            Err(err) => {
                tracing::error!("Failed to load notes for '{}': {}", owner_id, err);
                (Vec::new(), Some(AppError::db_query_failed(err.to_string())))
            }
        };

        let (tx, _rx) = watch::channel(items);
        Self {
            store,
            owner_id,
            items: tx,
            error: Mutex::new(error),
        }
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<AttachmentItem>> {
        self.items.subscribe()
    }

    #[must_use]
    pub fn items(&self) -> Vec<AttachmentItem> {
        self.items.borrow().clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<AppError> {
        self.error.lock().clone()
    }

    pub fn clear_error(&self) {
        *self.error.lock() = None;
    }

    /// Append `item` and persist. Returns `false` (with the error flag set)
    /// when the store rejects the write.
    pub async fn add_item(&self, item: AttachmentItem) -> bool {
        let mut items = match self.store.load(&self.owner_id).await {
            Ok(items) => items,
            Err(err) => return self.fail(AppError::storage_full(err.to_string())),
        };
        items.push(item);
        self.persist(items).await
    }

    /// Remove the item with `item_id`. Removing an unknown id still rewrites
    /// the owner's record and succeeds.
    pub async fn delete_item(&self, item_id: &str) -> bool {
        let mut items = match self.store.load(&self.owner_id).await {
            Ok(items) => items,
            Err(err) => return self.fail(AppError::storage_full(err.to_string())),
        };
        items.retain(|item| item.id != item_id);
        self.persist(items).await
    }

    /// Drop every item of this owner. Deletion is best effort in the store,
    /// so this always succeeds locally.
    pub async fn clear_all(&self) -> bool {
        self.store.delete(&self.owner_id).await;
        self.items.send_replace(Vec::new());
        self.clear_error();
        true
    }

    /// Read `path`, wrap it as a new item named `display_name`, and add it.
    ///
    /// # Errors
    /// Returns [`FileReadError`] when the file cannot be read. A persistence
    /// failure is reported through the `Ok(false)` result and the error flag.
    pub async fn upload_file<F>(
        &self,
        path: &Path,
        display_name: &str,
        on_progress: F,
    ) -> Result<bool, FileReadError>
    where
        F: FnMut(ReadProgress),
    {
        let payload = match read_file_base64(path, on_progress).await {
            Ok(payload) => payload,
            Err(err) => {
                *self.error.lock() = Some(AppError::file_read(err.to_string()));
                return Err(err);
            }
        };

        let original_file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = if display_name.trim().is_empty() {
            original_file_name.clone()
        } else {
            display_name.trim().to_string()
        };

        let item = AttachmentItem {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            original_file_name,
            base64_payload: payload,
            upload_timestamp: Utc::now(),
        };

        Ok(self.add_item(item).await)
    }

    async fn persist(&self, items: Vec<AttachmentItem>) -> bool {
        match self.store.save(&self.owner_id, &items).await {
            Ok(()) => {
                self.items.send_replace(items);
                self.clear_error();
                true
            }
            Err(err) => self.fail(AppError::storage_full(err.to_string())),
        }
    }

    fn fail(&self, error: AppError) -> bool {
        tracing::error!("Notes operation failed for '{}': {}", self.owner_id, error);
        *self.error.lock() = Some(error);
        false
    }
}

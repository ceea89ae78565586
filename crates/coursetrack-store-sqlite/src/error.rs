//! User-facing error model.
//!
//! Storage failures are contained at the store boundary and surfaced as an
//! [`AppError`] with:
//! - A stable code for the presentation layer
//! - A human-readable message
//! - Optional internal detail for logs
//! - A retry hint

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blob::BlobStoreError;
use crate::ingest::FileReadError;
use crate::kv::KvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Rejected input (malformed import document)
    Validation,
    /// File could not be read
    Io,
    /// Quota or attachment store failures
    Storage,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Io => write!(f, "io"),
            Self::Storage => write!(f, "storage"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

pub struct ErrorCode;

impl ErrorCode {
    pub const VALIDATION_INVALID_FORMAT: &'static str = "VALIDATION_INVALID_FORMAT";
    pub const IO_READ_ERROR: &'static str = "IO_READ_ERROR";
    pub const STORAGE_FULL: &'static str = "STORAGE_FULL";
    pub const STORAGE_WRITE_FAILED: &'static str = "STORAGE_WRITE_FAILED";
    pub const DB_QUERY_FAILED: &'static str = "DB_QUERY_FAILED";
    pub const INTERNAL_ERROR: &'static str = "INTERNAL_ERROR";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub retryable: bool,
    pub category: ErrorCategory,
}

impl AppError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
            retryable: false,
            category,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Attachment could not be persisted.
    pub fn storage_full(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::STORAGE_FULL,
            "Failed to save note. Storage may be full.",
            ErrorCategory::Storage,
        )
        .with_detail(detail)
        .retryable()
    }

    pub fn storage_write_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::STORAGE_WRITE_FAILED,
            message,
            ErrorCategory::Storage,
        )
        .retryable()
    }

    pub fn db_query_failed(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DB_QUERY_FAILED,
            "Failed to load notes.",
            ErrorCategory::Storage,
        )
        .with_detail(detail)
        .retryable()
    }

    pub fn file_read(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::IO_READ_ERROR,
            "Failed to read file.",
            ErrorCategory::Io,
        )
        .with_detail(detail)
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::VALIDATION_INVALID_FORMAT,
            message,
            ErrorCategory::Validation,
        )
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::INTERNAL_ERROR,
            "An unexpected error occurred.",
            ErrorCategory::Internal,
        )
        .with_detail(detail)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "[{}] {} ({})", self.code, self.message, detail),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl From<FileReadError> for AppError {
    fn from(e: FileReadError) -> Self {
        AppError::file_read(e.to_string())
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::QuotaExceeded { .. } => {
                AppError::storage_write_failed("Storage quota exceeded.").with_detail(e.to_string())
            }
            KvError::Json(_) => AppError::invalid_format(e.to_string()),
            KvError::Sqlite(_) => AppError::internal(e.to_string()),
        }
    }
}

impl From<BlobStoreError> for AppError {
    fn from(e: BlobStoreError) -> Self {
        AppError::storage_full(e.to_string())
    }
}

impl From<coursetrack_core::BackupError> for AppError {
    fn from(e: coursetrack_core::BackupError) -> Self {
        AppError::invalid_format(format!("Invalid backup: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_stable_code() {
        let err = AppError::storage_full("disk I/O error");
        let json = serde_json::to_value(&err)
            .unwrap_or_else(|e| panic!("error should serialize: {e}"));

        assert_eq!(json["code"], ErrorCode::STORAGE_FULL);
        assert_eq!(json["category"], "storage");
        assert_eq!(json["retryable"], true);
        assert_eq!(json["detail"], "disk I/O error");
    }

    #[test]
    fn detail_is_omitted_when_absent() {
        let json = serde_json::to_value(AppError::invalid_format("bad"))
            .unwrap_or_else(|e| panic!("error should serialize: {e}"));
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn quota_errors_map_to_storage_category() {
        let err: AppError = KvError::QuotaExceeded {
            key: "courses".to_string(),
            required: 10,
            quota: 5,
        }
        .into();
        assert_eq!(err.category, ErrorCategory::Storage);
        assert_eq!(err.code, ErrorCode::STORAGE_WRITE_FAILED);
    }
}

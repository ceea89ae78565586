//! Import/export document for the whole tracker state.
//!
//! Validation is a seam: the import path only trusts documents a
//! [`DocumentValidator`] accepted. [`ShapeValidator`] checks the structural
//! minimum the ledger relies on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::{CompletionHistory, LedgerSnapshot, TaskId};

pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub exported_at: Option<String>,
    pub courses: Value,
    #[serde(default)]
    pub completed_tasks: Vec<TaskId>,
    #[serde(default)]
    pub completion_history: BTreeMap<TaskId, String>,
}

fn default_version() -> u32 {
    BACKUP_VERSION
}

impl BackupDocument {
    #[must_use]
    pub fn new(courses: Value, ledger: &LedgerSnapshot, exported_at: DateTime<Utc>) -> Self {
        Self {
            version: BACKUP_VERSION,
            exported_at: Some(exported_at.to_rfc3339()),
            courses,
            completed_tasks: ledger.completed.clone(),
            completion_history: ledger
                .history
                .iter()
                .map(|(id, ts)| (id.clone(), ts.to_rfc3339()))
                .collect(),
        }
    }
}

/// Fully parsed import, ready to hydrate the ledger and catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedState {
    pub courses: Value,
    pub completed: Vec<TaskId>,
    pub history: CompletionHistory,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("unsupported backup version {0}")]
    UnsupportedVersion(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid backup: {0}")]
    Invalid(#[from] ValidationError),
    #[error("invalid completion timestamp for task {task_id}: {value}")]
    InvalidTimestamp { task_id: TaskId, value: String },
}

/// Accepts or rejects a raw import document.
pub trait DocumentValidator {
    /// # Errors
    /// Returns a [`ValidationError`] describing the first violation found.
    fn validate(&self, document: &Value) -> Result<(), ValidationError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeValidator;

impl DocumentValidator for ShapeValidator {
    fn validate(&self, document: &Value) -> Result<(), ValidationError> {
        let object = document.as_object().ok_or(ValidationError::NotAnObject)?;

        if let Some(version) = object.get("version") {
            let version = version.as_u64().ok_or_else(|| ValidationError::WrongType {
                field: "version".to_string(),
                expected: "an unsigned integer",
            })?;
            if version > u64::from(BACKUP_VERSION) {
                return Err(ValidationError::UnsupportedVersion(version));
            }
        }

        let courses = object
            .get("courses")
            .ok_or(ValidationError::MissingField("courses"))?
            .as_array()
            .ok_or_else(|| ValidationError::WrongType {
                field: "courses".to_string(),
                expected: "an array",
            })?;
        for (idx, course) in courses.iter().enumerate() {
            if !course.get("id").is_some_and(Value::is_string) {
                return Err(ValidationError::WrongType {
                    field: format!("courses[{idx}].id"),
                    expected: "a string",
                });
            }
        }

        if let Some(completed) = object.get("completedTasks") {
            let all_strings = completed
                .as_array()
                .is_some_and(|ids| ids.iter().all(Value::is_string));
            if !all_strings {
                return Err(ValidationError::WrongType {
                    field: "completedTasks".to_string(),
                    expected: "an array of strings",
                });
            }
        }

        if let Some(history) = object.get("completionHistory") {
            let all_strings = history
                .as_object()
                .is_some_and(|entries| entries.values().all(Value::is_string));
            if !all_strings {
                return Err(ValidationError::WrongType {
                    field: "completionHistory".to_string(),
                    expected: "an object of timestamp strings",
                });
            }
        }

        Ok(())
    }
}

/// Parse and validate an import document.
///
/// # Errors
/// Returns an error when the text is not JSON, the validator rejects it, or a
/// history timestamp is not RFC 3339.
pub fn parse_backup(
    raw: &str,
    validator: &dyn DocumentValidator,
) -> Result<ImportedState, BackupError> {
    let value: Value = serde_json::from_str(raw)?;
    validator.validate(&value)?;
    let document: BackupDocument = serde_json::from_value(value)?;

    let mut history = CompletionHistory::new();
    for (task_id, raw_ts) in document.completion_history {
        let parsed = DateTime::parse_from_rfc3339(&raw_ts).map_err(|_| {
            BackupError::InvalidTimestamp {
                task_id: task_id.clone(),
                value: raw_ts.clone(),
            }
        })?;
        history.insert(task_id, parsed.with_timezone(&Utc));
    }

    Ok(ImportedState {
        courses: document.courses,
        completed: document.completed_tasks,
        history,
    })
}

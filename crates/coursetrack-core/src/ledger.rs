//! Completion ledger: the authoritative set of done task ids, their
//! last-completion timestamps, and a bounded undo log.
//!
//! Un-marking a task keeps its history timestamp. Streaks stay stable when a
//! task is toggled off and on again; `purge_history` is the only way to drop
//! a timestamp.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

pub type TaskId = String;

/// Task id -> moment it was last marked done.
pub type CompletionHistory = BTreeMap<TaskId, DateTime<Utc>>;

pub const DEFAULT_UNDO_LIMIT: usize = 50;

/// One reversible ledger mutation. Each variant carries the history value
/// that existed before the mutation so undo can restore it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndoEntry {
    Mark {
        id: TaskId,
        previous_timestamp: Option<DateTime<Utc>>,
    },
    Unmark {
        id: TaskId,
        previous_timestamp: Option<DateTime<Utc>>,
    },
}

impl UndoEntry {
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::Mark { id, .. } | Self::Unmark { id, .. } => id,
        }
    }
}

/// Before/after view of a toggle so callers can react to a task becoming done
/// without querying the ledger again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub id: TaskId,
    pub was_done: bool,
    pub is_done: bool,
}

impl ToggleOutcome {
    #[must_use]
    pub fn just_completed(&self) -> bool {
        !self.was_done && self.is_done
    }
}

/// Persistable view of the ledger. The undo log is not included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub completed: Vec<TaskId>,
    pub history: CompletionHistory,
}

#[derive(Debug, Clone)]
pub struct CompletionLedger {
    completed: BTreeSet<TaskId>,
    history: CompletionHistory,
    undo: VecDeque<UndoEntry>,
    undo_limit: usize,
    revision: u64,
}

impl Default for CompletionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_undo_limit(DEFAULT_UNDO_LIMIT)
    }

    #[must_use]
    pub fn with_undo_limit(undo_limit: usize) -> Self {
        Self {
            completed: BTreeSet::new(),
            history: CompletionHistory::new(),
            undo: VecDeque::new(),
            undo_limit,
            revision: 0,
        }
    }

    /// Toggle `id` using the current wall clock as the completion time.
    pub fn toggle_task(&mut self, id: &str) -> ToggleOutcome {
        self.toggle_task_at(id, Utc::now())
    }

    /// Toggle `id`, stamping `now` into the history when it becomes done.
    pub fn toggle_task_at(&mut self, id: &str, now: DateTime<Utc>) -> ToggleOutcome {
        let was_done = self.completed.contains(id);

        let entry = if was_done {
            self.completed.remove(id);
            UndoEntry::Unmark {
                id: id.to_string(),
                previous_timestamp: self.history.get(id).copied(),
            }
        } else {
            self.completed.insert(id.to_string());
            UndoEntry::Mark {
                id: id.to_string(),
                previous_timestamp: self.history.insert(id.to_string(), now),
            }
        };

        self.push_undo(entry);
        self.revision += 1;

        ToggleOutcome {
            id: id.to_string(),
            was_done,
            is_done: !was_done,
        }
    }

    /// Revert the most recent toggle. Returns the entry that was applied, or
    /// `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<UndoEntry> {
        let entry = self.undo.pop_back()?;

        match &entry {
            UndoEntry::Mark {
                id,
                previous_timestamp,
            } => {
                self.completed.remove(id);
                self.restore_history(id, *previous_timestamp);
            }
            UndoEntry::Unmark {
                id,
                previous_timestamp,
            } => {
                self.completed.insert(id.clone());
                self.restore_history(id, *previous_timestamp);
            }
        }

        self.revision += 1;
        Some(entry)
    }

    /// Replace the whole ledger state. Not undoable: the undo log is cleared.
    ///
    /// Input is trusted; validation happens before documents reach the ledger.
    pub fn hydrate_tasks<I>(&mut self, ids: I, history: CompletionHistory)
    where
        I: IntoIterator<Item = TaskId>,
    {
        self.completed = ids.into_iter().collect();
        self.history = history;
        self.undo.clear();
        self.revision += 1;
    }

    /// Drop the history timestamp of a task that is not currently done.
    ///
    /// # Errors
    /// Returns [`CoreError::HistoryInUse`] when `id` is marked done.
    pub fn purge_history(&mut self, id: &str) -> Result<bool, CoreError> {
        if self.completed.contains(id) {
            return Err(CoreError::HistoryInUse(id.to_string()));
        }
        let removed = self.history.remove(id).is_some();
        if removed {
            self.revision += 1;
        }
        Ok(removed)
    }

    #[must_use]
    pub fn is_done(&self, id: &str) -> bool {
        self.completed.contains(id)
    }

    pub fn completed_ids(&self) -> impl Iterator<Item = &str> {
        self.completed.iter().map(String::as_str)
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    #[must_use]
    pub fn history(&self) -> &CompletionHistory {
        &self.history
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Monotonic counter bumped on every mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            completed: self.completed.iter().cloned().collect(),
            history: self.history.clone(),
        }
    }

    fn push_undo(&mut self, entry: UndoEntry) {
        if self.undo_limit == 0 {
            return;
        }
        if self.undo.len() == self.undo_limit {
            self.undo.pop_front();
        }
        self.undo.push_back(entry);
    }

    fn restore_history(&mut self, id: &str, timestamp: Option<DateTime<Utc>>) {
        match timestamp {
            Some(ts) => {
                self.history.insert(id.to_string(), ts);
            }
            None => {
                self.history.remove(id);
            }
        }
    }
}

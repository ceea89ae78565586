//! Debounce state machine behind the auto-save pipeline.
//!
//! The machine owns no timer. A driver feeds it changes and clock readings
//! and performs the save when [`Debouncer::poll`] hands back a value.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
    /// The last write failed. The value is kept, with no timer, until the
    /// next change, flush, or teardown.
    Unsaved,
}

/// Result of feeding a change into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Pipeline disabled; the change was not observed.
    Ignored,
    /// Value equals the last saved value. Any pending save was cancelled.
    Unchanged,
    Scheduled { deadline: Instant },
    /// A pending save was cancelled and the countdown restarted.
    Rescheduled { deadline: Instant },
}

#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    enabled: bool,
    last_saved: T,
    pending: Option<T>,
    state: DebounceState,
}

impl<T: Clone + PartialEq> Debouncer<T> {
    /// `initial` is treated as already persisted.
    #[must_use]
    pub fn new(initial: T, delay: Duration) -> Self {
        Self {
            delay,
            enabled: true,
            last_saved: initial,
            pending: None,
            state: DebounceState::Idle,
        }
    }

    pub fn on_change(&mut self, value: T, now: Instant) -> Transition {
        if !self.enabled {
            return Transition::Ignored;
        }

        if value == self.last_saved {
            self.cancel();
            return Transition::Unchanged;
        }

        let deadline = now + self.delay;
        let was_pending = matches!(self.state, DebounceState::Pending { .. });
        self.pending = Some(value);
        self.state = DebounceState::Pending { deadline };

        if was_pending {
            Transition::Rescheduled { deadline }
        } else {
            Transition::Scheduled { deadline }
        }
    }

    /// Timer tick. Returns the value to persist once the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                self.state = DebounceState::Idle;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Fire immediately regardless of the deadline.
    pub fn take_pending(&mut self) -> Option<T> {
        self.state = DebounceState::Idle;
        self.pending.take()
    }

    /// Record a failed write of `value`. It stays pending without a deadline
    /// so an explicit flush can retry it.
    pub fn mark_failed(&mut self, value: T) {
        self.pending = Some(value);
        self.state = DebounceState::Unsaved;
    }

    /// Record a successful write. A failed write must not be recorded so the
    /// next change is compared against what is actually on disk.
    pub fn mark_saved(&mut self, value: T) {
        self.last_saved = value;
    }

    /// Disabling cancels anything pending; the value is not persisted later.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.cancel();
        }
    }

    /// Teardown: the pending value, if any, is discarded and returned.
    pub fn teardown(&mut self) -> Option<T> {
        self.take_pending()
    }

    #[must_use]
    pub fn state(&self) -> DebounceState {
        self.state
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Pending { deadline } => Some(deadline),
            DebounceState::Idle | DebounceState::Unsaved => None,
        }
    }

    #[must_use]
    pub fn last_saved(&self) -> &T {
        &self.last_saved
    }

    fn cancel(&mut self) {
        self.pending = None;
        self.state = DebounceState::Idle;
    }
}

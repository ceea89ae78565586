//! Debounced auto-save driven by a tokio task.
//!
//! The task owns a [`Debouncer`] and a synchronous save function. Handles
//! feed it values; after `delay` of quiet the latest value is written once.
//! A value whose write failed stays pending without a timer until the next
//! change or flush. Dropping or shutting down the handle discards a pending
//! write: the last edit inside the debounce window is lost unless
//! [`AutoSavePipeline::flush`] was called first.

use std::fmt::Display;
use std::time::Duration;

use coursetrack_core::{Debouncer, Transition};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long the task parks when nothing is pending.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

enum Command<T> {
    Update(T),
    SetEnabled(bool),
    Flush(oneshot::Sender<bool>),
    Shutdown(oneshot::Sender<Option<T>>),
}

pub struct AutoSavePipeline<T> {
    name: &'static str,
    commands: mpsc::UnboundedSender<Command<T>>,
    task: JoinHandle<()>,
}

impl<T> AutoSavePipeline<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Start a pipeline. `initial` counts as already saved. Must be called
    /// from within a tokio runtime.
    pub fn spawn<F, E>(name: &'static str, initial: T, delay: Duration, save: F) -> Self
    where
        F: FnMut(&T) -> Result<(), E> + Send + 'static,
        E: Display + 'static,
    {
        let (commands, rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(initial, delay);
        let task = tokio::spawn(run(name, debouncer, rx, save));

        Self {
            name,
            commands,
            task,
        }
    }

    /// Observe a new value.
    pub fn update(&self, value: T) {
        self.send(Command::Update(value));
    }

    /// While disabled nothing is observed or saved; disabling also cancels a
    /// pending write.
    pub fn set_enabled(&self, enabled: bool) {
        self.send(Command::SetEnabled(enabled));
    }

    /// Write the pending value now, if any. Returns `false` when that write
    /// failed.
    pub async fn flush(&self) -> bool {
        let (ack, done) = oneshot::channel();
        self.send(Command::Flush(ack));
        done.await.unwrap_or(false)
    }

    /// Tear the pipeline down. A pending value is discarded, not written, and
    /// handed back to the caller.
    pub async fn shutdown(self) -> Option<T> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Shutdown(ack));
        let discarded = done.await.ok().flatten();
        if let Err(err) = self.task.await {
            tracing::error!("Autosave '{}' task ended abnormally: {}", self.name, err);
        }
        discarded
    }

    fn send(&self, command: Command<T>) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Autosave '{}' is no longer running", self.name);
        }
    }
}

async fn run<T, F, E>(
    name: &'static str,
    mut debouncer: Debouncer<T>,
    mut commands: mpsc::UnboundedReceiver<Command<T>>,
    mut save: F,
) where
    T: Clone + PartialEq,
    F: FnMut(&T) -> Result<(), E>,
    E: Display,
{
    loop {
        let deadline = debouncer.deadline().map(Instant::from_std);
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAIT);

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Update(value)) => {
                    match debouncer.on_change(value, Instant::now().into_std()) {
                        Transition::Scheduled { .. } | Transition::Rescheduled { .. } => {
                            tracing::trace!("Autosave '{}' scheduled", name);
                        }
                        Transition::Unchanged | Transition::Ignored => {}
                    }
                }
                Some(Command::SetEnabled(enabled)) => {
                    debouncer.set_enabled(enabled);
                    tracing::debug!("Autosave '{}' enabled={}", name, enabled);
                }
                Some(Command::Flush(ack)) => {
                    let saved = match debouncer.take_pending() {
                        Some(value) => persist(name, &mut debouncer, &mut save, value),
                        None => true,
                    };
                    let _ = ack.send(saved);
                }
                Some(Command::Shutdown(ack)) => {
                    let _ = ack.send(teardown(name, &mut debouncer));
                    break;
                }
                None => {
                    teardown(name, &mut debouncer);
                    break;
                }
            },
            () = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                if let Some(value) = debouncer.poll(Instant::now().into_std()) {
                    persist(name, &mut debouncer, &mut save, value);
                }
            }
        }
    }
}

fn persist<T, F, E>(name: &str, debouncer: &mut Debouncer<T>, save: &mut F, value: T) -> bool
where
    T: Clone + PartialEq,
    F: FnMut(&T) -> Result<(), E>,
    E: Display,
{
    match save(&value) {
        Ok(()) => {
            debouncer.mark_saved(value);
            tracing::debug!("Autosave '{}' wrote latest value", name);
            true
        }
        Err(err) => {
            // Kept unsaved: the next change reschedules, a flush retries.
            tracing::warn!("Autosave '{}' failed to write: {}", name, err);
            debouncer.mark_failed(value);
            false
        }
    }
}

fn teardown<T: Clone + PartialEq>(name: &str, debouncer: &mut Debouncer<T>) -> Option<T> {
    let discarded = debouncer.teardown();
    if discarded.is_some() {
        tracing::warn!("Autosave '{}' discarded an unsaved edit on shutdown", name);
    }
    discarded
}

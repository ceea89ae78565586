//! Dedicated connection thread for the attachment database.
//!
//! A `rusqlite::Connection` is not `Sync`, so every statement runs on one
//! owning thread and results travel back over a oneshot channel. Callers
//! never hold a lock across an await point.
//!
//! # Usage
//!
//! ```ignore
//! let executor = DbExecutor::new(conn);
//!
//! let count = executor.run(|conn| {
//!     conn.query_row("SELECT COUNT(*) FROM attachments", [], |r| r.get::<_, i64>(0))
//! }).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use rusqlite::Connection;
use tokio::sync::oneshot;

type DbResult<T> = Result<T, rusqlite::Error>;
type BoxedDbOp = Box<dyn FnOnce(&Connection) -> BoxedResult + Send + 'static>;
type BoxedResult = Box<dyn std::any::Any + Send + 'static>;

enum Message {
    Op {
        op: BoxedDbOp,
        response: oneshot::Sender<BoxedResult>,
    },
    Close,
}

/// Owns one connection on a background thread.
pub struct DbExecutor {
    sender: mpsc::Sender<Message>,
    closed: Arc<AtomicBool>,
    _handle: thread::JoinHandle<()>,
}

impl DbExecutor {
    /// Move `conn` onto a new thread that serves operations until closed.
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        let (sender, receiver) = mpsc::channel::<Message>();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = Arc::clone(&closed);

        let handle = thread::spawn(move || {
            while let Ok(message) = receiver.recv() {
                match message {
                    Message::Op { op, response } => {
                        let _ = response.send(op(&conn));
                    }
                    Message::Close => break,
                }
            }
            closed_flag.store(true, Ordering::Release);
            drop(conn);
        });

        Self {
            sender,
            closed,
            _handle: handle,
        }
    }

    /// Run `op` on the connection thread and await its result.
    ///
    /// # Errors
    /// Returns [`DbExecutorError::ChannelClosed`] when the connection thread
    /// has shut down, or the SQLite error produced by `op`.
    pub async fn run<F, T>(&self, op: F) -> Result<T, DbExecutorError>
    where
        F: FnOnce(&Connection) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();

        let boxed_op: BoxedDbOp = Box::new(move |conn| Box::new(op(conn)) as BoxedResult);

        self.sender
            .send(Message::Op {
                op: boxed_op,
                response: response_tx,
            })
            .map_err(|_| DbExecutorError::ChannelClosed)?;

        let boxed_result = response_rx
            .await
            .map_err(|_| DbExecutorError::ChannelClosed)?;

        let result = boxed_result
            .downcast::<DbResult<T>>()
            .map_err(|_| DbExecutorError::TypeMismatch)?;

        result.map_err(DbExecutorError::Database)
    }

    /// Ask the thread to drop its connection. Operations already queued run
    /// first; later ones fail with [`DbExecutorError::ChannelClosed`].
    pub fn close(&self) {
        let _ = self.sender.send(Message::Close);
    }

    /// True once the connection thread has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for DbExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbExecutorError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Channel closed - connection may have shut down")]
    ChannelClosed,

    #[error("Type mismatch in result - internal error")]
    TypeMismatch,
}

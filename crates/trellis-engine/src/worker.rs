//! Bounded execution of blocking capability operations.
//!
//! Each operation runs on its own named thread and reports back over a
//! channel. The caller waits until a deadline; a worker still running at the
//! deadline is abandoned and its eventual result is discarded.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use tracing::debug;

const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

/// Why a worker produced no result.
#[derive(Debug)]
pub(crate) enum WorkerError {
    /// The deadline passed first.
    TimedOut,
    /// The operation panicked.
    Panicked,
}

/// Result of an operation that is still running.
pub(crate) struct PendingOp<T> {
    label: String,
    receiver: Receiver<thread::Result<T>>,
    deadline: Instant,
}

/// Runs `operation` on a new thread named `label`.
///
/// # Errors
///
/// Returns the I/O error reported when the thread cannot be spawned.
pub(crate) fn spawn_op<T, F>(
    label: String,
    deadline: Instant,
    operation: F,
) -> Result<PendingOp<T>, io::Error>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = mpsc::sync_channel(1);
    let thread_label = label.clone();
    thread::Builder::new().name(label.clone()).spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(operation));
        if sender.send(outcome).is_err() {
            debug!(
                target: WORKER_TARGET,
                worker = thread_label.as_str(),
                "result discarded after the caller stopped waiting"
            );
        }
    })?;
    Ok(PendingOp {
        label,
        receiver,
        deadline,
    })
}

impl<T> PendingOp<T> {
    /// Blocks until the operation finishes or the deadline passes.
    pub(crate) fn wait(self) -> Result<T, WorkerError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(remaining) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Panicked),
            Err(RecvTimeoutError::Timeout) => {
                debug!(
                    target: WORKER_TARGET,
                    worker = self.label.as_str(),
                    "abandoning worker at deadline"
                );
                Err(WorkerError::TimedOut)
            }
        }
    }
}

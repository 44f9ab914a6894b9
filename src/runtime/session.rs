//! Per-connection session state.
//!
//! One `Session` exists per process. It is shared by the dispatcher, the
//! lifecycle controller and every evaluation task.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::connection::FrameWriter;

pub struct Session {
    writer: FrameWriter,
    shutdown: AtomicBool,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Session {
    pub fn new(writer: FrameWriter) -> Arc<Self> {
        Arc::new(Self {
            writer,
            shutdown: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Write half of the connection.
    pub fn writer(&self) -> &FrameWriter {
        &self.writer
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Flip the shutdown flag, wake the dispatcher and close the task group.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn begin_shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tasks.close();
        self.cancel.cancel();
        true
    }

    /// Resolves once shutdown has begun.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Run `task` as a tracked evaluation task.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Number of tracked tasks that have not finished.
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Resolves once shutdown has begun and every tracked task has finished.
    pub async fn drained(&self) {
        self.tasks.wait().await
    }
}

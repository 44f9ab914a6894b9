//! Frame dispatch loop.
//!
//! The dispatcher is the only reader of the connection. It decodes frames in
//! arrival order and routes them:
//!
//! - `client.close` / `client.cancel-all`: stop and drain, then exit
//! - `editor.eval.<lang>`: spawn an evaluation task and keep reading
//! - anything else: ignore
//!
//! Malformed frames, including lines that are not UTF-8, are logged and
//! dropped under either policy. What happens on read errors and end of
//! stream depends on the [`ReadErrorPolicy`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::connection::{FrameReader, ReadOutcome};
use super::eval::EvalHandler;
use super::lifecycle::{Lifecycle, StopReason};
use super::session::Session;
use crate::config::ReadErrorPolicy;
use crate::protocol::{decode, CommandKind};

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Reading and routing frames.
    Running,
    /// Shutdown started; waiting for evaluation tasks.
    Draining,
    /// Loop has exited. No further reads happen.
    Stopped,
}

/// Errors that end the dispatch loop abnormally.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to read from peer: {0}")]
    Read(#[source] io::Error),
}

/// Read-side behavior knobs.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub read_error_policy: ReadErrorPolicy,
    /// Pause before reading again after a skipped read failure or EOF.
    pub retry_delay: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            read_error_policy: ReadErrorPolicy::Lenient,
            retry_delay: Duration::from_millis(100),
        }
    }
}

enum Event {
    Shutdown,
    Read(io::Result<ReadOutcome>),
}

pub struct Dispatcher {
    reader: FrameReader,
    session: Arc<Session>,
    lifecycle: Arc<Lifecycle>,
    handler: EvalHandler,
    options: DispatchOptions,
    state: DispatchState,
}

impl Dispatcher {
    pub fn new(
        reader: FrameReader,
        session: Arc<Session>,
        lifecycle: Arc<Lifecycle>,
        handler: EvalHandler,
        options: DispatchOptions,
    ) -> Self {
        Self {
            reader,
            session,
            lifecycle,
            handler,
            options,
            state: DispatchState::Running,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Run until shutdown.
    ///
    /// Returns once the loop has stopped and evaluation tasks have drained.
    pub async fn run(&mut self) -> Result<(), DispatchError> {
        info!(policy = ?self.options.read_error_policy, "Dispatcher running");
        let session = Arc::clone(&self.session);

        while self.state == DispatchState::Running {
            if session.is_shutdown() {
                self.shutdown(StopReason::Requested).await;
                break;
            }

            let event = tokio::select! {
                biased;
                _ = session.cancelled() => Event::Shutdown,
                read = self.reader.read_line() => Event::Read(read),
            };

            match event {
                Event::Shutdown => self.shutdown(StopReason::Requested).await,
                Event::Read(Ok(ReadOutcome::Line(line))) => self.handle_line(&line).await,
                Event::Read(Ok(ReadOutcome::Malformed(line))) => {
                    warn!(line = %line, "Discarding line that is not valid UTF-8");
                }
                Event::Read(Ok(ReadOutcome::Eof)) => self.handle_eof().await,
                Event::Read(Err(e)) => self.handle_read_error(e).await?,
            }
        }

        Ok(())
    }

    async fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            trace!("Skipping blank line");
            return;
        }

        let message = match decode(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, line, "Discarding malformed frame");
                return;
            }
        };

        match message.kind() {
            CommandKind::Shutdown => {
                info!(id = message.id, command = %message.command, "Shutdown requested by peer");
                self.shutdown(StopReason::Command(message.command)).await;
            }
            CommandKind::Eval => {
                debug!(id = message.id, command = %message.command, "Dispatching evaluation");
                let handler = self.handler.clone();
                let session = Arc::clone(&self.session);
                self.session.spawn(handler.run(session, message));
            }
            CommandKind::Other => {
                debug!(id = message.id, command = %message.command, "Ignoring unrecognized command");
            }
        }
    }

    async fn handle_eof(&mut self) {
        match self.options.read_error_policy {
            ReadErrorPolicy::Lenient => {
                debug!("Peer stream at EOF, retrying");
                tokio::time::sleep(self.options.retry_delay).await;
            }
            ReadErrorPolicy::Strict => {
                info!("Peer closed the connection");
                self.shutdown(StopReason::EndOfStream).await;
            }
        }
    }

    async fn handle_read_error(&mut self, e: io::Error) -> Result<(), DispatchError> {
        match self.options.read_error_policy {
            ReadErrorPolicy::Lenient => {
                warn!(error = %e, "Read failed, skipping");
                tokio::time::sleep(self.options.retry_delay).await;
                Ok(())
            }
            ReadErrorPolicy::Strict => {
                error!(error = %e, "Read failed");
                self.shutdown(StopReason::ReadFailure).await;
                Err(DispatchError::Read(e))
            }
        }
    }

    async fn shutdown(&mut self, reason: StopReason) {
        self.state = DispatchState::Draining;
        self.lifecycle.stop(reason).await;
        self.state = DispatchState::Stopped;
    }
}

//! Startup handshake and orderly shutdown.
//!
//! Shutdown can start from two places: a `client.close`/`client.cancel-all`
//! frame seen by the dispatcher, or SIGINT/SIGTERM seen by the signal task.
//! Both end up in [`Lifecycle::stop`], which flips the session's shutdown
//! flag and waits for in-flight evaluations to finish.

use std::fmt;
use std::future::Future;
use std::io;
use std::num::ParseIntError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::session::Session;
use crate::protocol::message::EVAL_PREFIX;

/// Who this client says it is during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Client name shown by the editor.
    pub name: String,
    /// Language tag; also selects the eval command.
    pub lang: String,
}

impl Identity {
    /// The evaluation command this client answers.
    pub fn command(&self) -> String {
        format!("{EVAL_PREFIX}{}", self.lang)
    }
}

/// Handshake record, sent as a bare JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(rename = "client-id")]
    pub client_id: i64,
    pub dir: String,
    pub commands: String,
    #[serde(rename = "type")]
    pub client_type: String,
}

impl ClientInfo {
    /// Build the record, parsing the client id handed over by the editor.
    pub fn build(identity: &Identity, client_id: &str, dir: &Path) -> Result<Self, LifecycleError> {
        let client_id = client_id
            .trim()
            .parse::<i64>()
            .map_err(|source| LifecycleError::ClientId {
                value: client_id.to_string(),
                source,
            })?;

        Ok(Self {
            name: identity.name.clone(),
            client_id,
            dir: dir.to_string_lossy().into_owned(),
            commands: identity.command(),
            client_type: identity.lang.clone(),
        })
    }
}

/// Startup failures. All of them are fatal.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("couldn't parse client-id {value:?}: {source}")]
    ClientId {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("couldn't get working directory: {0}")]
    WorkingDir(#[source] io::Error),

    #[error("failed to encode handshake: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to send handshake: {0}")]
    Send(#[source] io::Error),
}

/// Why shutdown started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The peer sent a shutdown command.
    Command(String),
    /// The process received a signal.
    Signal(&'static str),
    /// The peer closed the connection (strict read policy).
    EndOfStream,
    /// Reading from the peer failed (strict read policy).
    ReadFailure,
    /// Shutdown was already underway when the dispatcher noticed.
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Command(command) => write!(f, "peer sent {command}"),
            StopReason::Signal(name) => write!(f, "received {name}"),
            StopReason::EndOfStream => write!(f, "peer closed the connection"),
            StopReason::ReadFailure => write!(f, "read from peer failed"),
            StopReason::Requested => write!(f, "shutdown requested"),
        }
    }
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Every evaluation task finished.
    Drained,
    /// The drain timeout expired with tasks still running.
    TimedOut { outstanding: usize },
}

/// Owns the startup and shutdown sequence of a session.
pub struct Lifecycle {
    session: Arc<Session>,
    drain_timeout: Option<Duration>,
}

impl Lifecycle {
    pub fn new(session: Arc<Session>, drain_timeout: Option<Duration>) -> Self {
        Self {
            session,
            drain_timeout,
        }
    }

    /// Announce this client to the peer.
    ///
    /// Must complete before the dispatcher starts reading.
    pub async fn handshake(
        &self,
        identity: &Identity,
        client_id: &str,
    ) -> Result<ClientInfo, LifecycleError> {
        let dir = std::env::current_dir().map_err(LifecycleError::WorkingDir)?;
        let info = ClientInfo::build(identity, client_id, &dir)?;
        self.send_handshake(&info).await?;
        Ok(info)
    }

    async fn send_handshake(&self, info: &ClientInfo) -> Result<(), LifecycleError> {
        let record = serde_json::to_string(info).map_err(LifecycleError::Encode)?;
        info!(handshake = %record, "Sending handshake");

        self.session
            .writer()
            .write_frame(&record)
            .await
            .map_err(LifecycleError::Send)
    }

    /// Begin shutdown and wait for in-flight evaluations.
    ///
    /// Safe to call more than once; later callers wait on the same drain.
    pub async fn stop(&self, reason: StopReason) -> StopOutcome {
        if self.session.begin_shutdown() {
            info!(
                %reason,
                outstanding = self.session.outstanding(),
                "Stopping, waiting for evaluations"
            );
        }

        let outcome = match self.drain_timeout {
            None => {
                self.session.drained().await;
                StopOutcome::Drained
            }
            Some(limit) => match tokio::time::timeout(limit, self.session.drained()).await {
                Ok(()) => StopOutcome::Drained,
                Err(_) => {
                    let outstanding = self.session.outstanding();
                    warn!(?limit, outstanding, "Drain timed out, abandoning evaluations");
                    StopOutcome::TimedOut { outstanding }
                }
            },
        };

        info!(?outcome, "Stop!");
        outcome
    }

    /// Spawn the task that turns the first SIGINT/SIGTERM into [`stop`].
    ///
    /// [`stop`]: Lifecycle::stop
    pub fn watch_signals(self: &Arc<Self>) -> JoinHandle<()> {
        self.watch(wait_for_signal())
    }

    /// Spawn a task that calls [`stop`] once `signal` resolves with the
    /// signal's name.
    ///
    /// [`stop`]: Lifecycle::stop
    pub fn watch<F>(self: &Arc<Self>, signal: F) -> JoinHandle<()>
    where
        F: Future<Output = &'static str> + Send + 'static,
    {
        let lifecycle = Arc::clone(self);
        tokio::spawn(async move {
            let name = signal.await;
            lifecycle.stop(StopReason::Signal(name)).await;
        })
    }
}

/// Wait for SIGINT or SIGTERM and return its name.
///
/// A signal source that cannot be installed is logged and never fires.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

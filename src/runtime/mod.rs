//! Client runtime.
//!
//! Wires the pieces of a session together:
//! - `connection`: the TCP stream, split into a reader and a locked writer
//! - `session`: shared state (writer, shutdown flag, evaluation task group)
//! - `lifecycle`: handshake, signal handling, stop and drain
//! - `dispatcher`: the read loop that routes frames
//! - `eval`: one task per evaluation request

pub mod connection;
pub mod dispatcher;
pub mod eval;
pub mod lifecycle;
pub mod session;

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::evaluator::Evaluator;
use dispatcher::{DispatchError, DispatchOptions, Dispatcher};
use eval::EvalHandler;
use lifecycle::{Lifecycle, LifecycleError};
use session::Session;

/// Fatal client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Handshake(#[from] LifecycleError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Run the client to completion on a multi-threaded tokio runtime.
pub fn run(config: Config, evaluator: Arc<dyn Evaluator>) -> Result<(), ClientError> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("eval-client");
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build().map_err(ClientError::Runtime)?;

    let result = runtime.block_on(run_session(config, evaluator));

    // Evaluations abandoned by a drain timeout must not hold up exit.
    runtime.shutdown_background();
    result
}

/// Connect, handshake, dispatch until stopped.
pub async fn run_session(
    config: Config,
    evaluator: Arc<dyn Evaluator>,
) -> Result<(), ClientError> {
    let address = config.address();
    let (reader, writer) = connection::open(&address, config.keepalive)
        .await
        .map_err(|source| ClientError::Connect {
            address: address.clone(),
            source,
        })?;
    info!(%address, "Connected");

    let session = Session::new(writer);
    let lifecycle = Arc::new(Lifecycle::new(Arc::clone(&session), config.drain_timeout));
    lifecycle.handshake(&config.identity, &config.client_id).await?;

    let signals = lifecycle.watch_signals();

    let mut dispatcher = Dispatcher::new(
        reader,
        session,
        lifecycle,
        EvalHandler::new(evaluator, config.eval_timeout),
        DispatchOptions {
            read_error_policy: config.read_error_policy,
            retry_delay: config.retry_delay,
        },
    );
    let result = dispatcher.run().await;

    signals.abort();
    info!(state = ?dispatcher.state(), "Session finished");
    result.map_err(ClientError::from)
}

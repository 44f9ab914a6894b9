//! eval-client: evaluation client for an editor host.
//!
//! The editor starts this process with the port it listens on and a client
//! id. The client connects back, introduces itself, and then answers
//! `editor.eval.<lang>` requests until the editor closes it or the process
//! receives SIGINT/SIGTERM.
//!
//! Features:
//! - Array-framed JSON line protocol (`[id,command,payload]`)
//! - Concurrent evaluations with responses correlated by id
//! - Graceful shutdown that waits for in-flight evaluations
//! - Configuration via CLI arguments and an optional TOML file

mod config;
mod evaluator;
mod protocol;
mod runtime;

use std::fs::File;
use std::sync::{Arc, Mutex};

use config::Config;
use evaluator::EchoEvaluator;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config)?;

    info!(
        address = %config.address(),
        client_id = %config.client_id,
        name = %config.identity.name,
        lang = %config.identity.lang,
        read_error_policy = ?config.read_error_policy,
        "Starting eval-client"
    );

    runtime::run(config, Arc::new(EchoEvaluator))?;
    Ok(())
}

/// Log to the configured file, or to stderr when none is set.
fn init_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match &config.log_file {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                format!("Can't create/open logfile '{}': {}", path.display(), e)
            })?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

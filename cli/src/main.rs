//! Errand CLI - sample driver for the client surface.
//!
//! ```text
//! main() -> Args::parse -> load config -> ClientContext + TaskQueue -> session::run -> shutdown
//! ```
//!
//! With threaded delivery the driver blocks on `get_status(true)`; with polled delivery it
//! pumps `HttpTransport::update()` until the operation settles. Either way the context is
//! cleaned up and the queue terminated before exit.

mod args;
mod session;

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use errand_client::ClientContext;
use errand_config::{ConfigError, DEFAULT_LOG_FILTER, ErrandConfig, ResolvedConfig};
use errand_queue::{QueueOptions, TaskQueue};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::args::{Args, Command, USAGE};

fn init_tracing(default_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.errand/logs/errand.log
    if let Some(config_path) = ErrandConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("errand.log"));
    }

    // Fallback: ./.errand/logs/errand.log
    candidates.push(PathBuf::from(".errand").join("logs").join("errand.log"));

    candidates
}

fn load_config(path: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
    let raw = match path {
        Some(path) => ErrandConfig::load_from(path)?,
        None => ErrandConfig::load()?.unwrap_or_default(),
    };
    raw.resolve()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse(env::args().skip(1))?;
    if args.command == Command::Help {
        print!("{USAGE}");
        return Ok(());
    }

    let config = load_config(args.config.as_deref());
    init_tracing(
        config
            .as_ref()
            .map_or(DEFAULT_LOG_FILTER, |c| c.logging.filter.as_str()),
    );
    let mut config = config.context("failed to load errand configuration")?;
    if let Some(delivery) = args.delivery {
        config.transport.delivery = delivery;
    }
    tracing::debug!(delivery = %config.transport.delivery, "Starting");

    let client = ClientContext::from_config(&config)?;
    let queue = TaskQueue::from_current_runtime(QueueOptions::thread_pool())?;

    let outcome = session::run(&client, &queue, &args.command).await;
    session::shutdown(client, &queue).await;

    println!("{}", outcome?);
    Ok(())
}

//! Tracing setup for the relay and the agent front-end.
//!
//! Events go to stderr and to a daily-rolling `relay.log` under the platform
//! data directory. `RUST_LOG` overrides the default filter.

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "relay.log";
const DEFAULT_FILTER: &str = "info,agentrelay=debug";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// Returns the file writer's guard and the log directory. Dropping the guard
/// stops the background writer, so `main` keeps it until exit.
pub fn init() -> Result<(WorkerGuard, PathBuf)> {
    let log_dir = log_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        "agentrelay starting"
    );

    Ok((guard, log_dir))
}

fn log_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("com", "agentrelay", "agentrelay")
        .map(|dirs| dirs.data_dir().join("logs"))
        .ok_or_else(|| anyhow::anyhow!("no home directory to place relay logs under"))
}

/// Stderr-only subscriber for unit tests; later calls are no-ops.
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::registry()
        .with(env_filter("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

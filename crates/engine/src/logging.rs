//! Logging setup
//!
//! Two sinks: stderr at the level chosen by `RUST_LOG` or `-v`, and a
//! debug-level log file in the configured logs directory. The file is
//! rotated on every start so each run gets a fresh one, and written from a
//! background worker through `tracing_appender::non_blocking`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Name of the log file inside the logs directory
pub const LOG_FILE: &str = "certward.log";

/// Number of rotated log files kept
pub const LOG_BACKUPS: usize = 10;

/// Logging options taken from the command line
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Debug level on stderr
    pub verbose: bool,
    /// JSON lines on stderr
    pub json: bool,
}

/// Keeps the file writer alive
///
/// Buffered lines are flushed when this is dropped, so hold it until the
/// end of `main`.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    path: Option<PathBuf>,
    _worker: Option<WorkerGuard>,
}

impl LogGuard {
    /// The log file, or `None` when only stderr logging is active
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Shift `name`, `name.1`, ... up by one and return the path for a fresh log
///
/// The oldest file beyond `backups` is removed.
pub fn rotate(dir: &Path, name: &str, backups: usize) -> io::Result<PathBuf> {
    let current = dir.join(name);
    if backups == 0 {
        return Ok(current);
    }

    let numbered = |n: usize| dir.join(format!("{}.{}", name, n));
    match fs::remove_file(numbered(backups)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    for n in (1..backups).rev() {
        let from = numbered(n);
        if from.exists() {
            fs::rename(&from, numbered(n + 1))?;
        }
    }
    if current.exists() {
        fs::rename(&current, numbered(1))?;
    }
    Ok(current)
}

/// Rotate the previous runs' logs and open an appender on a fresh file
fn open_appender(logs_dir: &Path) -> io::Result<(PathBuf, RollingFileAppender)> {
    fs::create_dir_all(logs_dir)?;
    let path = rotate(logs_dir, LOG_FILE, LOG_BACKUPS)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE)
        .build(logs_dir)
        .map_err(io::Error::other)?;
    Ok((path, appender))
}

/// Install the global subscriber
pub fn init(logs_dir: &Path, options: &LogOptions) -> LogGuard {
    let default_level = if options.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = if options.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    let (path, worker, file_layer, open_error) = match open_appender(logs_dir) {
        Ok((path, appender)) => {
            let (writer, worker) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG);
            (Some(path), Some(worker), Some(layer), None)
        }
        Err(e) => (None, None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(e) = open_error {
        warn!(logs_dir = %logs_dir.display(), error = %e, "Could not open log file, logging to stderr only");
    }

    LogGuard {
        path,
        _worker: worker,
    }
}

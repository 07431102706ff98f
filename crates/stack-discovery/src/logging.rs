//! Tracing subscriber setup
//!
//! The daemon logs to a daily-rotated file next to the configured log path.
//! When that directory cannot be written, output goes to stderr instead so
//! a misconfigured host still shows why the daemon stopped.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// The returned guard flushes buffered lines on drop and must be held until
/// the process exits. `RUST_LOG` overrides the level chosen by `debug`.
pub fn init_logging(log_file: &Path, max_log_files: usize, debug: bool) -> Option<WorkerGuard> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match file_appender(log_file, max_log_files) {
        Ok(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        Err(e) => {
            eprintln!(
                "stack-discovery: cannot write {} ({}), logging to stderr",
                log_file.display(),
                e
            );
            (BoxMakeWriter::new(std::io::stderr), None)
        }
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(guard.is_none())
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }

    tracing::info!(log_file = %log_file.display(), "Logging initialized");
    guard
}

/// Daily-rotated appender writing `<dir>/<name>.<date>`
pub fn file_appender(log_file: &Path, max_log_files: usize) -> Result<RollingFileAppender, InitError> {
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = log_file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "stack-discovery.log".to_string());

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(max_log_files.max(1))
        .build(dir)
}

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILE: &str = "fabricgrid.log";

/// Initialize the tracing/logging system.
///
/// Console output goes to stderr (JSON when `structured`); `log_file` adds a
/// daily-rolling file layer. `RUST_LOG` overrides `log_level`. Keep the
/// returned guard alive for the life of the process so buffered file output
/// is flushed.
pub fn init_logging(log_level: &str, log_file: Option<&Path>, structured: bool) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (file_writer, guard) = match log_file {
        Some(path) => {
            let (dir, filename) = rolling_file_parts(path);
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, filename));
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let result = if structured {
        let console = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let file = file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
        });
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file)
            .try_init()
    } else {
        let console = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(true);
        let file = file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
        });
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file)
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
    guard
}

/// Split a log path into the directory and file prefix for the rolling appender.
fn rolling_file_parts(path: &Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
    (dir, filename)
}

//! Logging setup.
//!
//! One tracing subscriber for the whole process, with explicit sinks: a
//! stderr layer gated by `-q`/`-v`, and an optional append-only file layer
//! for components that keep their own log (the queue engine, the
//! harvester). There is no second print path.

use crate::error::{Result, StentorError};
use std::path::Path;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable overriding the log filter (e.g. `STENTOR_LOG=debug`).
const LOG_ENV_VAR: &str = "STENTOR_LOG";

/// Keeps the background file writer alive; drop on process exit flushes it.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber. Call once, at the top of main.
///
/// `quiet` wins over `verbose`; both are overridden by `STENTOR_LOG`.
pub fn init(quiet: bool, verbose: u8, log_file: Option<&Path>) -> Result<LogGuard> {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let directive: Directive = default_level
        .parse()
        .map_err(|e| StentorError::Other(format!("invalid log directive: {e}")))?;
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(directive)
        .from_env()
        .map_err(|e| StentorError::Other(format!("invalid {LOG_ENV_VAR}: {e}")))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, file_guard) = match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| StentorError::Other(format!(
                    "log path has no file name: {}",
                    path.display()
                )))?;
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(false)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

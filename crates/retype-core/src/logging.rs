//! Dual-output logging: human-readable lines on stderr and the same events
//! appended to `<config dir>/retype/logs/retype.log`.
//!
//! ```rust,ignore
//! let _guard = retype_core::logging::init(&settings);
//! tracing::info!("started");
//! ```

use crate::config::{get_log_dir, Settings, LOG_FILENAME};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Keeps the file writer alive. Dropping it flushes pending lines.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. `RUST_LOG` overrides `settings.log_level`.
pub fn init(settings: &Settings) -> LoggingGuard {
    init_in(&get_log_dir(), settings)
}

/// Same as [`init`] with an explicit log directory.
pub fn init_in(log_dir: &Path, settings: &Settings) -> LoggingGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true);

    let (file_layer, file_guard) = match fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(log_dir, LOG_FILENAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!(
                "Failed to create log directory {}: {}",
                log_dir.display(),
                e
            );
            (None, None)
        }
    };

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    LoggingGuard {
        _file_guard: file_guard,
    }
}

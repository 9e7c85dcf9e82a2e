use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

/// Guard returned by [`init`]; dropping it flushes the non-blocking file
/// appender, so callers must hold it for the lifetime of `main`.
pub struct LogGuard(Option<tracing_appender::non_blocking::WorkerGuard>);

/// Initialize the global `tracing` subscriber from `[server]` config.
///
/// Honors `RUST_LOG` if set, otherwise falls back to `server.log_level`.
/// Writes to `server.log` when non-empty, stdout otherwise. `server.log_format`
/// selects between human-readable and JSON output.
pub fn init(config: &ServerConfig) -> LogGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log.is_empty() {
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        if config.log_format == "json" {
            builder.json().init();
        } else {
            builder.init();
        }
        LogGuard(None)
    } else {
        let path = std::path::Path::new(&config.log);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("clowder.log"));
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .with_ansi(false);
        if config.log_format == "json" {
            builder.json().init();
        } else {
            builder.init();
        }
        LogGuard(Some(guard))
    }
}

/// Log a FATAL-severity event. `tracing` has no fifth level above ERROR, so
/// FATAL is an ERROR event tagged `fatal = true` for downstream filters.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        tracing::error!(fatal = true, $($arg)*)
    };
}

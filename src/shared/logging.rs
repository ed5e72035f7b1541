use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking writers flushing; hold it for the life of `main`.
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Console logging always, plus a daily-rolling file under `log_dir` when the
/// directory is writable. `RUST_LOG` overrides the default `info` filter.
pub fn init_service_logging(log_dir: &str, service_name: &str) -> LoggingGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (stdout_writer, stdout_guard) = non_blocking(std::io::stdout());
    fn console_layer<S>(
        writer: tracing_appender::non_blocking::NonBlocking,
    ) -> impl tracing_subscriber::Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(true)
            .with_target(false)
    }

    if !log_dir_writable(log_dir) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer(stdout_writer))
            .init();
        info!("Logging initialized - console output only (cannot write to {log_dir})");
        return LoggingGuard {
            _guards: vec![stdout_guard],
        };
    }

    let rotated = rotate_logs_on_startup(log_dir, service_name);

    let file_appender = rolling::daily(log_dir, format!("{service_name}.log"));
    let (file_writer, file_guard) = non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer(stdout_writer))
        .init();

    info!("Logging initialized - logs will be written to {log_dir}/{service_name}.log");
    match rotated {
        Ok(Some(backup)) => info!("Previous log file backed up to: {backup}"),
        Ok(None) => {}
        Err(e) => tracing::warn!("Could not rotate previous log file: {e}"),
    }

    LoggingGuard {
        _guards: vec![file_guard, stdout_guard],
    }
}

fn log_dir_writable(log_dir: &str) -> bool {
    let marker = format!("{log_dir}/.nbpod_write_check");
    std::fs::create_dir_all(log_dir)
        .and_then(|_| std::fs::File::create(&marker))
        .map(|_| std::fs::remove_file(&marker))
        .is_ok()
}

/// Moves `<service>.log` aside with a timestamp suffix; returns the backup path.
pub fn rotate_logs_on_startup(
    log_dir: &str,
    service_name: &str,
) -> Result<Option<String>, std::io::Error> {
    let log_file = format!("{log_dir}/{service_name}.log");
    if !Path::new(&log_file).exists() {
        return Ok(None);
    }

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let backup_file = format!("{log_dir}/{service_name}.{timestamp}.log");
    std::fs::rename(&log_file, &backup_file)?;
    Ok(Some(backup_file))
}

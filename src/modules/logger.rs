use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Local-time RFC 3339 timestamps
struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(w, "{}", now.to_rfc3339())
    }
}

/// Initialize logging: console always, plus a daily rolling file when `log_dir` is
/// usable. The returned guard flushes the file writer and must be held until exit.
pub fn init_logger(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Capture `log` records from dependencies
    let _ = tracing_log::LogTracer::init();

    let mut file_guard = None;
    let mut file_layer = None;

    if let Some(dir) = log_dir {
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("Failed to create log directory {}: {}", dir.display(), e);
        } else if is_log_dir_writable(dir) {
            let file_appender = tracing_appender::rolling::daily(dir, "scan-mux.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            file_guard = Some(guard);
            file_layer = Some(
                fmt::Layer::new()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true)
                    .with_timer(LocalTimer),
            );
        } else {
            eprintln!("Log directory {} is not writable, logging to console only", dir.display());
        }
    }

    let console_layer = fmt::Layer::new()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_timer(LocalTimer);

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if file_guard.is_some() {
        info!("Logging initialized (console + file)");
    } else {
        info!("Logging initialized (console)");
    }
    file_guard
}

fn is_log_dir_writable(dir: &Path) -> bool {
    let marker = dir.join(".write_test");
    let result = fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&marker)
        .and_then(|mut f| f.write_all(b"ok"));

    if result.is_ok() {
        let _ = fs::remove_file(marker);
        true
    } else {
        false
    }
}

use chrono::Local;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Clone, Copy)]
struct CompactTimer;

impl FormatTime for CompactTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%m%dT%H:%M:%S%.3f"))
    }
}

/// Install a subscriber that writes to stdout and to a non-blocking log file.
///
/// The returned guard must be kept alive for the duration of the program,
/// dropping it flushes and closes the file writer.
pub fn init(log_path: impl AsRef<Path>, level: &str) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let file = std::fs::File::create(log_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(CompactTimer)
                .with_writer(std::io::stdout)
                .with_filter(tracing_subscriber::EnvFilter::new(level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(CompactTimer)
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    Ok(guard)
}

/// Install a stdout-only subscriber, for demos and ad-hoc runs without a
/// result directory.
pub fn init_stdout(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(CompactTimer)
                .with_writer(std::io::stdout)
                .with_filter(tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Initialize logging. Foreground mode writes to standard error; service
/// mode writes to a daily-rolling file under `logs/`. The returned guard
/// must stay alive for the duration of the process so buffered file
/// output is flushed.
pub fn init(foreground: bool, debug: bool) -> Option<WorkerGuard> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    if foreground {
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(tracing_subscriber::filter::LevelFilter::from_level(level));
        Registry::default().with(layer).init();
        None
    } else {
        let appender = tracing_appender::rolling::daily("logs", "df1d.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(tracing_subscriber::filter::LevelFilter::from_level(level));
        Registry::default().with(layer).init();
        Some(guard)
    }
}

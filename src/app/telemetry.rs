use super::{ApplicationError, LogLevel};
use std::path::Path;
use tracing::{subscriber::set_global_default, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

const LOG_FILE: &str = "log.log";

/// A subscriber printing to `console::Term::stdout` and writing JSON records to `log.log` in the
/// output directory. `RUST_LOG` takes precedence over `level`.
///
/// The returned guard flushes the file writer when dropped, so it must live as long as the run.
pub(crate) fn get_subscriber(
    level: LogLevel,
    directory: &Path,
) -> Result<(impl Subscriber + Send + Sync, WorkerGuard), ApplicationError> {
    std::fs::create_dir_all(directory)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let console_layer = tracing_subscriber::fmt::Layer::new()
        .with_writer(console::Term::stdout)
        .with_target(false)
        .without_time();

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, LOG_FILE));
    let file_layer = tracing_subscriber::fmt::Layer::new()
        .with_writer(file_writer)
        .json();

    let subscriber = Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    Ok((subscriber, guard))
}

/// Routes `log` records through tracing and installs `subscriber` for the whole process
pub(crate) fn init_subscriber(
    subscriber: impl Subscriber + Send + Sync,
) -> Result<(), ApplicationError> {
    LogTracer::init()?;
    set_global_default(subscriber)?;
    Ok(())
}

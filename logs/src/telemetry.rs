use std::{panic, path::PathBuf};

use tracing::{subscriber::set_global_default, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Where the bunyan-formatted output goes.
#[derive(Debug, Clone)]
pub enum LogSink {
    /// Hourly-rolled files under the given directory (defaults to `./.logs`).
    File(Option<PathBuf>),
    Stdout,
}

pub fn get_subscriber(
    name: String,
    default_filter: String,
    sink: LogSink,
) -> (impl Subscriber + Send + Sync, WorkerGuard) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let (non_blocking, guard) = match sink {
        LogSink::File(dir) => {
            let dir = dir.unwrap_or_else(|| {
                let mut base = std::env::current_dir()
                    .expect("failed to determine the current directory");
                base.push(".logs");
                base
            });
            tracing_appender::non_blocking(tracing_appender::rolling::hourly(dir, "vault.log"))
        }
        LogSink::Stdout => tracing_appender::non_blocking(std::io::stdout()),
    };
    let formatting_layer = BunyanFormattingLayer::new(name, non_blocking);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    (subscriber, guard)
}

/// Registers a subscriber as the global default and routes `log` events into
/// it. Must be called at most once per process.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("failed to set logger");
    set_global_default(subscriber).expect("failed to set subscriber");
}

/// Routes panic payloads through the subscriber so that worker panics land in
/// the same stream as ordinary errors.
pub fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| panic_info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic payload");
        match panic_info.location() {
            Some(location) => {
                super::error!(
                    "panic at {}:{}: {payload}",
                    location.file(),
                    location.line()
                );
            }
            None => super::error!("panic: {payload}"),
        }
    }));
}

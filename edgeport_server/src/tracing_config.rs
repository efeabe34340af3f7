use crate::config::*;

use tracing::{Metadata, Subscriber};
use tracing_core::LevelFilter;
use tracing_subscriber::{filter::filter_fn, prelude::*, registry::LookupSpan, Layer};

use std::{io::Error as IoError, path::Path};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

fn entry_accepts(entry: &LogEntry, metadata: &Metadata<'_>) -> bool {
    let level: LevelFilter = entry.level.map(Into::into).unwrap_or(LevelFilter::TRACE);
    if metadata.level() > &level {
        return false;
    }

    match metadata.module_path() {
        Some(module) if !entry.modules.is_empty() => entry.modules.iter().any(|m| module.starts_with(m.as_str())),
        _ => true,
    }
}

fn build_target<S>(entry: LogEntry, dir: &Path) -> Result<BoxedLayer<S>, IoError>
where
    S: Subscriber + Send + Sync,
    for<'span> S: LookupSpan<'span>,
{
    let layer = match &entry.target {
        LogTarget::File { filename } => {
            std::fs::create_dir_all(dir)?;
            tracing_subscriber::fmt::layer()
                .with_writer(tracing_appender::rolling::daily(dir, filename))
                .with_ansi(false)
                .boxed()
        }
        LogTarget::Builtin(BuiltinLogTarget::Stdout) => tracing_subscriber::fmt::layer().with_writer(std::io::stdout).boxed(),
        LogTarget::Builtin(BuiltinLogTarget::Stderr) => tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed(),
    };

    Ok(layer.with_filter(filter_fn(move |metadata| entry_accepts(&entry, metadata))).boxed())
}

/// Build the process-wide subscriber described by the logging config.
pub fn build_subscriber(conf: LoggingConfig) -> Result<impl Subscriber, IoError> {
    let layers = conf
        .targets
        .iter()
        .cloned()
        .map(|entry| build_target(entry, &conf.dir))
        .collect::<Result<Vec<_>, _>>()?;

    // Per-target filters do the real work; this one only trims noisy external modules
    let filter = tracing_subscriber::filter::Targets::new()
        .with_default(conf.default_level.unwrap_or(LogLevel::Trace))
        .with_targets(conf.module_levels);

    let console = conf
        .console_address
        .map(|addr| console_subscriber::ConsoleLayer::builder().server_addr(addr).spawn());

    Ok(tracing_subscriber::registry().with(console).with(filter).with(layers))
}

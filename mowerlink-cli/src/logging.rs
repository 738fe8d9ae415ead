//! Tracing subscriber setup for the command line client.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, format::Writer, time::FormatTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "mowerlink=info,mowerlink_cli=info";

const VERBOSE_LOG_FILTER: &str = "mowerlink=debug,mowerlink_cli=debug";

/// Timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Debug, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

impl LogOptions {
    fn filter(&self) -> EnvFilter {
        if self.quiet {
            EnvFilter::new("error")
        } else if self.verbose {
            EnvFilter::new(VERBOSE_LOG_FILTER)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer and must outlive the program.
pub fn init_logging(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let console = if options.json {
        fmt::layer()
            .json()
            .with_timer(LocalTimer)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_timer(LocalTimer)
            .with_target(options.verbose)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "mowerlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(options.filter())
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to set global default subscriber")?;

    Ok(guard)
}

//! Tracing subscriber setup.
//!
//! Events go to three places: stdout, `combined.log` (every enabled event,
//! JSON) and `error.log` (ERROR only, JSON). Both files live in the
//! configured log directory and are appended to.

use crate::config::LogSettings;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const COMBINED_LOG: &str = "combined.log";
pub const ERROR_LOG: &str = "error.log";

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Build the subscriber without installing it.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn build_subscriber(
    settings: &LogSettings,
) -> io::Result<impl Subscriber + Send + Sync + 'static> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    std::fs::create_dir_all(&settings.log_dir)?;
    let combined = Arc::new(open_append(&settings.log_dir.join(COMBINED_LOG))?);
    let errors = Arc::new(open_append(&settings.log_dir.join(ERROR_LOG))?);

    let stdout = if settings.log_json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(false).boxed()
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(fmt::layer().json().with_ansi(false).with_writer(combined))
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(errors)
                .with_filter(LevelFilter::ERROR),
        ))
}

/// Install the global subscriber.
pub fn init_tracing(settings: &LogSettings) -> Result<(), Box<dyn std::error::Error>> {
    build_subscriber(settings)?.try_init()?;
    Ok(())
}

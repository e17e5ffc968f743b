//! Logging setup
//!
//! Every line goes to stdout and, unless disabled, is appended to a
//! per-day file `<log_dir>/YYYY-MM-DD.log`, named after the local date at
//! startup.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Settings;
use crate::Result;

/// Initialize tracing; returns the log file path when file logging is on
pub fn init_tracing(settings: &Settings, verbose: bool) -> Result<Option<PathBuf>> {
    let log_level = if verbose {
        "debug"
    } else {
        settings.log_level.as_str()
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(true);

    let (file_layer, log_path) = if settings.log_to_file {
        let path = daily_log_path(&settings.log_dir, Local::now().date_naive());
        let file = open_log_file(&path)?;
        let layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        (Some(layer), Some(path))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(log_path)
}

/// Path of the log file for `date`
pub fn daily_log_path(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("{}.log", date.format("%Y-%m-%d")))
}

/// Open `path` for appending, creating its directory if needed
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Could not create log directory: {}", dir.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Could not open log file: {}", path.display()))
}

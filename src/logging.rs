use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;
use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::Settings;

static INIT: OnceCell<Option<PathBuf>> = OnceCell::new();

/// Installs the global subscriber: compact lines on stderr plus, when the log
/// directory is writable, a timestamped file under `LOG_DIR`. Returns the log
/// file path. Later calls are no-ops that return the first result.
pub fn init(settings: &Settings) -> Option<PathBuf> {
    INIT.get_or_init(|| install(settings)).clone()
}

fn install(settings: &Settings) -> Option<PathBuf> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&settings.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(filter());

    let log_path = settings.log_dir.join(format!(
        "fcrank_{}.log",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let file = fs::create_dir_all(&settings.log_dir)
        .and_then(|()| File::create(&log_path))
        .ok();
    let opened = file.is_some();
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(filter())
    });

    let installed = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if !installed {
        return None;
    }
    if opened {
        tracing::debug!(path = %log_path.display(), "logging to file");
        Some(log_path)
    } else {
        tracing::warn!(dir = %settings.log_dir.display(), "log directory unavailable, logging to stderr only");
        None
    }
}

use std::env::var;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{
    Layer, Registry, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("failed to open log file {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Options for [`init_with`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: LevelFilter,
    /// Plain-text copy of every event, appended to this file.
    pub file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self { level: LevelFilter::INFO, file: None }
    }
}

/// Initialize the global tracing subscriber.
///
/// Console output is compact unless `RUST_LOG_FORMAT=json`. `RUST_LOG`
/// overrides `options.level` for both the console and the file layer.
pub fn init_with(options: LogOptions) -> Result<(), LoggerError> {
    let log_format = var("RUST_LOG_FORMAT")
        .inspect_err(|error| {
            warn!("Failed to read RUST_LOG_FORMAT, falling back to default: {error}")
        })
        .unwrap_or_default();

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_filter(env_filter(options.level))
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_filter(env_filter(options.level))
            .boxed(),
    };
    layers.push(console);

    if let Some(path) = &options.file {
        let file = open_log_file(path)?;
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(env_filter(options.level))
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(())
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder().with_default_directive(level.into()).from_env_lossy()
}

fn open_log_file(path: &Path) -> Result<File, LoggerError> {
    let to_error = |source| LoggerError::LogFile { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    OpenOptions::new().create(true).append(true).open(path).map_err(to_error)
}

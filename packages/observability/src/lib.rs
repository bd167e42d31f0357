//! # Observability
//!
//! Logging setup shared by the tracker crates.
//!
//! Crates only emit through `tracing` macros. The binary calls
//! [`init_with_config`] once at startup to decide where those events go:
//!
//! - a JSONL file (one object per line), when `log_path` is set
//! - compact human-readable stderr, when `also_stderr` is set or no file is
//!   configured
//!
//! `RUST_LOG` takes precedence over `default_level`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() -> anyhow::Result<()> {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "tracker".into(),
//!         default_level: "debug".into(),
//!         log_path: Some(paths.log_file()),
//!         ..Default::default()
//!     })?;
//!
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

mod file;
mod json_layer;

pub use file::LineWriter;
pub use json_layer::{JsonLayer, LogEntry};

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    /// The log file could not be opened
    #[error("failed to open log file {path:?}: {source}")]
    LogFile { path: PathBuf, source: io::Error },

    /// A global subscriber is already installed
    #[error("subscriber already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Included in every JSONL line for filtering.
    pub service_name: String,

    /// Default filter directive (e.g. "debug", "info,tracker_emitter=trace").
    /// Overridden by `RUST_LOG`.
    pub default_level: String,

    /// JSONL output file. `None` logs to stderr only.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr when a file is configured.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "tracker".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Install a stderr-only subscriber for `service_name` at `info`.
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Install the global subscriber described by `config`.
///
/// Fails instead of panicking when a subscriber is already installed, so
/// tests and embedding hosts can call it more than once.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let json_layer = match &config.log_path {
        Some(path) => {
            let writer = LineWriter::open(path).map_err(|source| InitError::LogFile {
                path: path.clone(),
                source,
            })?;
            Some(
                JsonLayer::new(config.service_name.clone(), writer)
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = (config.log_path.is_none() || config.also_stderr).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()?;

    if let Some(path) = &config.log_path {
        tracing::debug!(log_path = %path.display(), "Logging initialized");
    }
    Ok(())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

pub use tracing::Level;

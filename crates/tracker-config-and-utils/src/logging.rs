//! Logging initialization for the tracker CLI.

use crate::{CoreResult, Paths};
use observability::LogConfig;

/// Initialize logging for the CLI.
///
/// Structured JSONL goes to `<base>/logs/tracker.jsonl` and is mirrored to
/// stderr. `RUST_LOG` overrides `level`.
pub fn init_logging(paths: &Paths, level: &str) -> CoreResult<()> {
    observability::init_with_config(LogConfig {
        service_name: "tracker".into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    })?;
    Ok(())
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

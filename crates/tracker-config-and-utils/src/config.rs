//! Configuration file for the tracker CLI.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use tracker_emitter::{BufferOption, EmitterConfig, RateLimitAction};
use tracker_event_store::{DropPolicy, Encoding, SqliteEventStore, StoreCapacity};
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Overrides `log_level`.
pub const ENV_LOG_LEVEL: &str = "TRACKER_LOG_LEVEL";

/// Overrides `endpoint`.
pub const ENV_ENDPOINT: &str = "TRACKER_ENDPOINT";

/// On-disk configuration (`<base>/config.json`).
///
/// Every field is optional in the file; missing fields take the emitter
/// defaults. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Collector base URL.
    pub endpoint: String,
    pub method: Encoding,
    pub byte_limit_get: usize,
    pub byte_limit_post: usize,
    pub buffer_option: BufferOption,
    pub emit_range: usize,
    pub flush_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: f64,
    /// Status code overrides: `true` retries, `false` drops.
    pub retry_rules: BTreeMap<u16, bool>,
    pub rate_limit_action: RateLimitAction,
    pub custom_headers: BTreeMap<String, String>,
    pub request_timeout_ms: u64,
    /// Maximum pending events; unbounded when absent.
    pub store_capacity: Option<usize>,
    pub drop_policy: DropPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let emitter = EmitterConfig::default();
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            endpoint: emitter.endpoint,
            method: emitter.method,
            byte_limit_get: emitter.byte_limit_get,
            byte_limit_post: emitter.byte_limit_post,
            buffer_option: emitter.buffer_option,
            emit_range: emitter.emit_range,
            flush_interval_ms: emitter.flush_interval.as_millis() as u64,
            backoff_base_ms: emitter.backoff_base.as_millis() as u64,
            backoff_max_ms: emitter.backoff_max.as_millis() as u64,
            backoff_jitter: emitter.backoff_jitter,
            retry_rules: emitter.retry_rules,
            rate_limit_action: emitter.rate_limit_action,
            custom_headers: emitter.custom_headers,
            request_timeout_ms: emitter.request_timeout.as_millis() as u64,
            store_capacity: None,
            drop_policy: DropPolicy::default(),
        }
    }
}

impl Config {
    /// Load `<base>/config.json`, falling back to defaults, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `<base>/config.json`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply `TRACKER_LOG_LEVEL` and `TRACKER_ENDPOINT` from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.log_level = level;
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.trim().is_empty()) {
            self.endpoint = endpoint;
        }
    }

    /// Build the emitter's immutable configuration snapshot.
    pub fn emitter_config(&self) -> CoreResult<EmitterConfig> {
        Url::parse(&self.endpoint)?;
        let config = EmitterConfig {
            endpoint: self.endpoint.clone(),
            method: self.method,
            byte_limit_get: self.byte_limit_get,
            byte_limit_post: self.byte_limit_post,
            buffer_option: self.buffer_option,
            emit_range: self.emit_range,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            backoff_jitter: self.backoff_jitter,
            retry_rules: self.retry_rules.clone(),
            rate_limit_action: self.rate_limit_action,
            custom_headers: self.custom_headers.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..EmitterConfig::default()
        };
        config
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Capacity applied to the event store, if configured.
    pub fn store_capacity(&self) -> Option<StoreCapacity> {
        self.store_capacity.map(|max_events| StoreCapacity {
            max_events,
            drop_policy: self.drop_policy,
        })
    }

    /// Open the persistent event queue at `<base>/events.sqlite`.
    pub fn open_store(&self, paths: &Paths) -> CoreResult<SqliteEventStore> {
        let store = SqliteEventStore::open(&paths.database_file())?;
        Ok(match self.store_capacity() {
            Some(capacity) => store.with_capacity(capacity),
            None => store,
        })
    }
}

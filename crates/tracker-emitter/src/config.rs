//! Emitter configuration snapshot.

use crate::{EmitterError, EmitterResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracker_event_store::Encoding;

/// How many pending events accumulate before `add` triggers a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferOption {
    /// Trigger on every event.
    Single,
    /// Trigger once 10 events are pending.
    #[default]
    DefaultGroup,
    /// Trigger once 25 events are pending.
    LargeGroup,
}

impl BufferOption {
    pub fn threshold(&self) -> usize {
        match self {
            Self::Single => 1,
            Self::DefaultGroup => 10,
            Self::LargeGroup => 25,
        }
    }
}

/// Reaction to a 429 from the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAction {
    /// Keep cycling, but raise the backoff level by `rate_limit_level_step`.
    #[default]
    ExtendBackoff,
    /// Stop automatic cycling until `resume()` is called.
    Pause,
}

/// Immutable configuration consumed by [`Emitter`](crate::Emitter) at construction.
///
/// Runtime changes go through explicit emitter operations
/// (`pause`, `resume`, `set_limits`), never through this struct.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Collector base URL, e.g. `https://collector.example.com`.
    pub endpoint: String,
    /// Preferred request encoding.
    pub method: Encoding,
    /// Max query string bytes for a GET request.
    pub byte_limit_get: usize,
    /// Max body bytes for a POST request.
    pub byte_limit_post: usize,
    pub buffer_option: BufferOption,
    /// Events read from the store per query (and max events per POST).
    pub emit_range: usize,
    /// Timer interval for automatic delivery cycles.
    pub flush_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Exponent cap: delay is `base * 2^min(level, cap)`.
    pub backoff_cap_level: u32,
    /// Jitter as a fraction of the delay, in `[0, 1]`.
    pub backoff_jitter: f64,
    /// Per-status override: `true` retries, `false` drops.
    pub retry_rules: BTreeMap<u16, bool>,
    pub rate_limit_action: RateLimitAction,
    /// Backoff levels added on a 429 under `ExtendBackoff`.
    pub rate_limit_level_step: u32,
    pub initially_paused: bool,
    /// Headers attached to every collector request.
    pub custom_headers: BTreeMap<String, String>,
    pub request_timeout: Duration,
    pub get_path: String,
    pub post_path: String,
}

/// Default request-size limit for both encodings.
pub const DEFAULT_BYTE_LIMIT: usize = 40_000;

/// Default number of events read per store query.
pub const DEFAULT_EMIT_RANGE: usize = 150;

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9090".to_string(),
            method: Encoding::Post,
            byte_limit_get: DEFAULT_BYTE_LIMIT,
            byte_limit_post: DEFAULT_BYTE_LIMIT,
            buffer_option: BufferOption::default(),
            emit_range: DEFAULT_EMIT_RANGE,
            flush_interval: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
            backoff_cap_level: 10,
            backoff_jitter: 0.1,
            retry_rules: BTreeMap::from([(408, true), (425, true)]),
            rate_limit_action: RateLimitAction::default(),
            rate_limit_level_step: 2,
            initially_paused: false,
            custom_headers: BTreeMap::new(),
            request_timeout: Duration::from_secs(30),
            get_path: "/i".to_string(),
            post_path: "/com.snowplowanalytics.snowplow/tp2".to_string(),
        }
    }
}

impl EmitterConfig {
    /// Create a config for the given collector with default policy.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Check invariants the emitter relies on.
    pub fn validate(&self) -> EmitterResult<()> {
        url::Url::parse(&self.endpoint)?;
        if self.emit_range == 0 {
            return Err(EmitterError::Config("emit_range must be positive".to_string()));
        }
        if self.byte_limit_get == 0 || self.byte_limit_post == 0 {
            return Err(EmitterError::Config("byte limits must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(EmitterError::Config(format!(
                "backoff_jitter must be within [0, 1], got {}",
                self.backoff_jitter
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(EmitterError::Config("flush_interval must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Byte limit for the given encoding.
    pub fn byte_limit(&self, encoding: Encoding) -> usize {
        match encoding {
            Encoding::Get => self.byte_limit_get,
            Encoding::Post => self.byte_limit_post,
        }
    }
}

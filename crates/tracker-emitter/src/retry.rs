//! Classification of delivery outcomes and backoff computation.

use crate::{EmitterConfig, RateLimitAction};
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;

/// Result of a single transport exchange for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The collector responded with this HTTP status.
    Status(u16),
    /// No response was received.
    NetworkError(String),
}

/// What a send outcome means for the events in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Delivered; remove from the store.
    Success,
    /// Keep in the store and back off.
    Retryable,
    /// Retrying cannot help; remove from the store and report as dropped.
    NonRetryable,
    /// Collector backpressure; keep in the store with extended backoff.
    RateLimited,
}

impl Classification {
    /// Whether the batch's events leave the store.
    pub fn removes_events(&self) -> bool {
        matches!(self, Self::Success | Self::NonRetryable)
    }
}

/// Maps HTTP outcomes to store actions and computes backoff delays.
///
/// | Outcome | Classification |
/// |---------|----------------|
/// | network error | Retryable |
/// | 2xx | Success |
/// | 3xx | NonRetryable |
/// | 429 | RateLimited |
/// | other 4xx | NonRetryable |
/// | 5xx | Retryable |
/// | outside 100-599 | Retryable |
///
/// `retry_rules` overrides any non-2xx status: `true` makes it retryable,
/// `false` makes it non-retryable.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry_rules: BTreeMap<u16, bool>,
    backoff_base: Duration,
    backoff_max: Duration,
    cap_level: u32,
    jitter: f64,
    rate_limit_action: RateLimitAction,
    rate_limit_level_step: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &EmitterConfig) -> Self {
        Self {
            retry_rules: config.retry_rules.clone(),
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
            cap_level: config.backoff_cap_level,
            jitter: config.backoff_jitter,
            rate_limit_action: config.rate_limit_action,
            rate_limit_level_step: config.rate_limit_level_step,
        }
    }

    /// Classify one batch outcome.
    pub fn classify(&self, outcome: &SendOutcome) -> Classification {
        let status = match outcome {
            SendOutcome::NetworkError(_) => return Classification::Retryable,
            SendOutcome::Status(status) => *status,
        };

        if (200..300).contains(&status) {
            return Classification::Success;
        }

        if let Some(&retry) = self.retry_rules.get(&status) {
            return match (retry, status) {
                (true, 429) => Classification::RateLimited,
                (true, _) => Classification::Retryable,
                (false, _) => Classification::NonRetryable,
            };
        }

        match status {
            300..=399 => Classification::NonRetryable,
            429 => Classification::RateLimited,
            400..=499 => Classification::NonRetryable,
            500..=599 => Classification::Retryable,
            _ => Classification::Retryable,
        }
    }

    pub fn rate_limit_action(&self) -> RateLimitAction {
        self.rate_limit_action
    }

    /// Backoff level after a cycle that ended in a retryable failure.
    pub fn next_level(&self, level: u32, rate_limited: bool) -> u32 {
        let step = if rate_limited {
            self.rate_limit_level_step.max(1)
        } else {
            1
        };
        level.saturating_add(step)
    }

    /// Unjittered delay for a backoff level: `min(base * 2^min(level, cap), max)`.
    pub fn base_delay(&self, level: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis() as u64;
        let max_ms = self.backoff_max.as_millis() as u64;
        let shift = level.min(self.cap_level);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

        Duration::from_millis(delay_ms)
    }

    /// Jittered delay for a backoff level, never above `backoff_max`.
    pub fn backoff_delay(&self, level: u32) -> Duration {
        let delay = self.base_delay(level);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        delay.mul_f64(factor).min(self.backoff_max)
    }
}

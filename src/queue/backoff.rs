// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for queue requeues and syncer retries.
//!
//! Two flavours:
//!
//! - [`ItemRateLimiter`] tracks consecutive failures per queue key and is
//!   deterministic (no jitter), so `num_requeues` and the resulting delay are
//!   predictable.
//! - [`ExponentialBackoff`] is a single-owner retry schedule with jitter, used
//!   by syncers so that many syncers failing together do not retry in lockstep.

use crate::constants::{
    QUEUE_BASE_DELAY_MILLIS, QUEUE_MAX_DELAY_SECS, SYNCER_RETRY_INITIAL_MILLIS,
    SYNCER_RETRY_MAX_SECS,
};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Per-key exponential failure rate limiter.
///
/// The delay for a key is `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct ItemRateLimiter {
    base: Duration,
    max: Duration,
    failures: HashMap<String, u32>,
}

impl Default for ItemRateLimiter {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(QUEUE_BASE_DELAY_MILLIS),
            Duration::from_secs(QUEUE_MAX_DELAY_SECS),
        )
    }
}

impl ItemRateLimiter {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn when(&mut self, key: &str) -> Duration {
        let failures = self.failures.entry(key.to_string()).or_insert(0);
        let exp = *failures;
        *failures = failures.saturating_add(1);

        // 2^31 * 5ms is far past any sane cap
        if exp >= 31 {
            return self.max;
        }
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Clear the failure history of `key`.
    pub fn forget(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`.
    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

/// Exponential backoff with jitter for a single retrying task.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration, restored by [`ExponentialBackoff::reset`]
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
        }
    }

    /// Get the next backoff interval and advance the schedule.
    pub fn next_backoff(&mut self) -> Duration {
        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        jittered
    }

    /// Restart the schedule after a success.
    pub fn reset(&mut self) {
        self.current_interval = self.initial_interval;
    }

    /// Apply randomization (jitter) to an interval.
    pub fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let jittered = rand::rng().random_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Retry schedule for a syncer after a failed sync.
///
/// # Configuration
///
/// - **Initial interval**: 1 second
/// - **Max interval**: 5 minutes
/// - **Multiplier**: 2.0
/// - **Randomization**: ±10%
#[must_use]
pub fn syncer_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(SYNCER_RETRY_INITIAL_MILLIS),
        Duration::from_secs(SYNCER_RETRY_MAX_SECS),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod backoff_tests;

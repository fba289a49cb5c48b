// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Staleness monitor backing the liveness endpoint.
//!
//! Service and endpoint workers stamp a [`TimeTracker`] after every pass. The
//! controller reports unhealthy once the stamp is older than the configured
//! bound; queue behaviour is not affected.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, PoisonError};

/// Time of the last completed pass.
#[derive(Debug)]
pub struct TimeTracker {
    last: Mutex<DateTime<Utc>>,
}

impl Default for TimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeTracker {
    /// Start tracking from now, so a fresh controller is healthy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Utc::now()),
        }
    }

    /// Record a completed pass and return its time.
    pub fn track(&self) -> DateTime<Utc> {
        let now = Utc::now();
        self.set(now);
        now
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    #[must_use]
    pub fn get(&self) -> DateTime<Utc> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` if a pass completed within `bound` of `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, bound: Duration) -> bool {
        now.signed_duration_since(self.get()) <= bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_fresh() {
        let tracker = TimeTracker::new();
        assert!(tracker.is_fresh(Utc::now(), Duration::hours(1)));
    }

    /// Test that the tracker goes stale once the bound has passed
    #[test]
    fn test_stale_after_bound() {
        let tracker = TimeTracker::new();
        let then = Utc::now() - Duration::minutes(61);
        tracker.set(then);

        assert_eq!(tracker.get(), then);
        assert!(!tracker.is_fresh(Utc::now(), Duration::hours(1)));

        tracker.track();
        assert!(tracker.is_fresh(Utc::now(), Duration::hours(1)));
    }
}

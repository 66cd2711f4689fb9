// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::SocketTime;
use std::time::Duration;

/// An unreasonable long time, for SCTP purposes. Mainly used as upper bound.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

// The upper limit for the exponential backoff, to avoid overflow.
const MAX_BACKOFF_COUNT: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackoffAlgorithm {
    Fixed,
    Exponential,
}

/// A passive timer, polled by its owner.
///
/// Nothing fires by itself: the owner asks [`Timer::expire`] whether the deadline has passed. An
/// expired timer is re-armed for another period (using its backoff algorithm) until it has been
/// restarted `max_restarts` times, after which it stops.
///
/// Used as the per-destination T3-rtx timer (exponential backoff, as RFC 9260 section 6.3.3 E2
/// doubles the RTO on each expiry) and the association's T5-shutdown-guard timer (one shot).
#[derive(Debug)]
pub struct Timer {
    base_duration: Duration,
    backoff_algorithm: BackoffAlgorithm,
    max_restarts: Option<u32>,
    max_backoff_duration: Duration,
    expiration_count: u32,
    next_expiry: Option<SocketTime>,
}

impl Timer {
    pub fn new(
        duration: Duration,
        backoff_algorithm: BackoffAlgorithm,
        max_restarts: Option<u32>,
        max_backoff_duration: Option<Duration>,
    ) -> Self {
        Self {
            base_duration: duration,
            backoff_algorithm,
            max_restarts,
            max_backoff_duration: max_backoff_duration.unwrap_or(MAX_DURATION).min(MAX_DURATION),
            expiration_count: 0,
            next_expiry: None,
        }
    }

    fn period(&self) -> Duration {
        let period = match self.backoff_algorithm {
            BackoffAlgorithm::Fixed => self.base_duration,
            BackoffAlgorithm::Exponential => {
                let exponent = self.expiration_count.min(MAX_BACKOFF_COUNT);
                self.base_duration.saturating_mul(1 << exponent)
            }
        };
        period.min(self.max_backoff_duration)
    }

    /// Returns true if the timer has expired at `now`, and re-arms it (or stops it, when out of
    /// restarts). Not idempotent: a second call at the same time returns false.
    pub fn expire(&mut self, now: SocketTime) -> bool {
        match self.next_expiry {
            Some(expiry) if expiry <= now => {
                self.expiration_count = self.expiration_count.saturating_add(1);
                let can_restart = self.max_restarts.is_none_or(|max| self.expiration_count <= max);
                // Re-arm relative to the deadline, not `now`, to avoid drifting.
                self.next_expiry = can_restart.then(|| expiry + self.period());
                true
            }
            _ => false,
        }
    }

    pub fn next_expiry(&self) -> Option<SocketTime> {
        self.next_expiry
    }

    pub fn is_running(&self) -> bool {
        self.next_expiry.is_some()
    }

    pub fn stop(&mut self) {
        self.next_expiry = None;
    }

    /// Starts the timer, or restarts it if running. The backoff is reset.
    pub fn start(&mut self, now: SocketTime) {
        self.expiration_count = 0;
        self.next_expiry = Some(now + self.period());
    }

    /// Starts the timer only if it isn't already running.
    pub fn start_if_stopped(&mut self, now: SocketTime) {
        if !self.is_running() {
            self.start(now);
        }
    }

    /// Updates the base duration, which is used the next time the timer is started or re-armed.
    pub fn set_duration(&mut self, duration: Duration) {
        self.base_duration = duration;
    }

    pub fn duration(&self) -> Duration {
        self.base_duration
    }
}

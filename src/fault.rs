/*
 * This file is part of Kilnwatch.
 *
 * Copyright (C) 2025 Kilnwatch contributors
 *
 * Kilnwatch is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Kilnwatch is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Kilnwatch. If not, see <https://www.gnu.org/licenses/>.
 */

use std::time::{Duration, Instant};

/// Result of one data-ready poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A fresh conversion is available; the caller should read it.
    Fresh,
    /// No fresh data yet, but still within the timeout budget.
    Stale,
    /// The consecutive-miss limit was reached; recovery must be invoked.
    TimedOut,
}

/// Tracks consecutive "data not ready" polls against a timeout limit.
///
/// Separates "do we have a fresh reading" from "how many times in a row
/// have we failed", so the supervisor can apply one uniform recovery
/// policy regardless of why data-ready stopped asserting. This type
/// never touches hardware itself.
#[derive(Debug)]
pub struct FaultMonitor {
    count: u32,
    limit: u32,
    last_reset: Instant,
}

impl FaultMonitor {
    /// `limit` is the number of consecutive not-ready polls that counts
    /// as a timeout. Must be at least 1 (enforced by config validation).
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit, last_reset: Instant::now() }
    }

    /// Record one poll. The counter is incremented on every call and
    /// reset to 0 whenever `is_ready` is true.
    pub fn poll(&mut self, is_ready: bool) -> PollOutcome {
        self.count += 1;
        if is_ready {
            self.count = 0;
            self.last_reset = Instant::now();
            PollOutcome::Fresh
        } else if self.count >= self.limit {
            PollOutcome::TimedOut
        } else {
            PollOutcome::Stale
        }
    }

    /// Clear the counter. Called by the recovery path after a power
    /// cycle so a still-dead sensor gets a full timeout budget again.
    pub fn reset(&mut self) {
        self.count = 0;
        self.last_reset = Instant::now();
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.count
    }

    /// Time since the counter was last cleared, for diagnostics.
    pub fn since_last_fresh(&self) -> Duration {
        self.last_reset.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_poll_resets_counter() {
        let mut m = FaultMonitor::new(5);
        for _ in 0..4 {
            assert_eq!(m.poll(false), PollOutcome::Stale);
        }
        assert_eq!(m.consecutive_misses(), 4);
        assert_eq!(m.poll(true), PollOutcome::Fresh);
        assert_eq!(m.consecutive_misses(), 0);
    }

    #[test]
    fn times_out_on_limit_th_miss() {
        let mut m = FaultMonitor::new(3);
        assert_eq!(m.poll(false), PollOutcome::Stale);
        assert_eq!(m.poll(false), PollOutcome::Stale);
        assert_eq!(m.poll(false), PollOutcome::TimedOut);
    }

    #[test]
    fn limit_of_one_times_out_immediately() {
        let mut m = FaultMonitor::new(1);
        assert_eq!(m.poll(false), PollOutcome::TimedOut);
        assert_eq!(m.poll(true), PollOutcome::Fresh);
    }

    #[test]
    fn reset_restores_full_budget() {
        let mut m = FaultMonitor::new(2);
        m.poll(false);
        m.poll(false);
        m.reset();
        assert_eq!(m.poll(false), PollOutcome::Stale);
        assert_eq!(m.poll(false), PollOutcome::TimedOut);
    }

    #[test]
    fn keeps_timing_out_without_reset() {
        let mut m = FaultMonitor::new(2);
        m.poll(false);
        assert_eq!(m.poll(false), PollOutcome::TimedOut);
        assert_eq!(m.poll(false), PollOutcome::TimedOut);
    }
}

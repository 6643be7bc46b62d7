// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

/// Tracks the deadline for crash-time operations.
///
/// The whole emission sequence (write the report, wait for the receiver to
/// acknowledge, reap it) shares one deadline, so each step polls
/// [`TimeoutManager::remaining`] rather than taking a fresh timeout.
pub struct TimeoutManager {
    start_time: Instant,
    timeout: Duration,
}

impl TimeoutManager {
    // 4ms per sched slice, give ~4x10 slices so a reap can still succeed
    // after the main deadline has passed.
    pub(crate) const MINIMUM_REAP_TIME: Duration = Duration::from_millis(160);

    pub fn new(timeout: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            timeout,
        }
    }

    /// Time left on the deadline, floored at [`Self::MINIMUM_REAP_TIME`].
    pub fn remaining(&self) -> Duration {
        let elapsed = self.start_time.elapsed();
        if elapsed >= self.timeout {
            Self::MINIMUM_REAP_TIME
        } else {
            (self.timeout - elapsed).max(Self::MINIMUM_REAP_TIME)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for TimeoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutManager")
            .field("start_time", &self.start_time)
            .field("elapsed", &self.elapsed())
            .field("timeout", &self.timeout)
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_respects_floor() {
        // A timeout below the reap floor is clamped up to the floor.
        let manager = TimeoutManager::new(Duration::from_millis(50));
        assert_eq!(manager.remaining(), TimeoutManager::MINIMUM_REAP_TIME);
    }

    #[test]
    fn test_remaining_after_deadline() {
        let manager = TimeoutManager::new(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        assert!(manager.elapsed() > manager.timeout());
        // Past the deadline there is still a minimal reap budget.
        assert_eq!(manager.remaining(), TimeoutManager::MINIMUM_REAP_TIME);
    }

    #[test]
    fn test_remaining_counts_down() {
        let timeout = Duration::from_secs(60);
        let manager = TimeoutManager::new(timeout);
        assert!(manager.remaining() <= timeout);
        assert!(manager.remaining() > Duration::from_secs(59));
    }
}

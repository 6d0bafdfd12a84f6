//! Restart delay estimation.
//!
//! A run that lasted at least [`RestartPolicy::healthy_threshold`] is
//! *healthy*: the next start happens after the minimal delay and the crash
//! count decays by one step towards [`RestartPolicy::healthy_crash_count`].
//!
//! Anything shorter is *unhealthy*: the crash count grows by one and the
//! delay doubles for every crash above the tolerated count, up to
//! [`RestartPolicy::max_delay`].
//!
//! ```
//! use std::time::Duration;
//! use execsight_receiver::subprocess::RestartPolicy;
//!
//! let policy = RestartPolicy {
//!     healthy_threshold: Duration::from_secs(60),
//!     healthy_crash_count: 1,
//!     initial_delay: Duration::from_secs(1),
//!     max_delay: Duration::from_secs(10),
//! };
//!
//! // first fast crash is tolerated
//! let first = policy.estimate(Duration::from_millis(5), 0);
//! assert_eq!((first.crash_count, first.delay), (1, Duration::from_secs(1)));
//!
//! // second one doubles
//! let second = policy.estimate(Duration::from_millis(5), first.crash_count);
//! assert_eq!((second.crash_count, second.delay), (2, Duration::from_secs(2)));
//!
//! // a long run resets the delay and decays the count
//! let healthy = policy.estimate(Duration::from_secs(120), second.crash_count);
//! assert_eq!((healthy.crash_count, healthy.delay), (1, Duration::from_secs(1)));
//! ```

use std::time::Duration;

/// Delay before the first restart and after every healthy run.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Cap for the restart delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Parameters of the restart delay computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Minimum lifetime of a healthy run.
    pub healthy_threshold: Duration,
    /// Crash count the decay stops at; crashes up to it restart at the minimal delay.
    pub healthy_crash_count: u32,
    /// Minimal delay.
    pub initial_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            healthy_threshold: Duration::from_secs(30 * 60),
            healthy_crash_count: 3,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

/// Outcome of [`RestartPolicy::estimate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayEstimate {
    /// How the run was classified.
    pub health: Health,
    /// Crash count to carry into the next run.
    pub crash_count: u32,
    /// Time to wait before the next start.
    pub delay: Duration,
}

impl RestartPolicy {
    /// Classify a run by its lifetime.
    pub fn classify(&self, elapsed: Duration) -> Health {
        if elapsed >= self.healthy_threshold {
            Health::Healthy
        } else {
            Health::Unhealthy
        }
    }

    /// Compute the next crash count and restart delay.
    pub fn estimate(&self, elapsed: Duration, crash_count: u32) -> DelayEstimate {
        match self.classify(elapsed) {
            Health::Healthy => {
                let crash_count = if crash_count > self.healthy_crash_count {
                    crash_count - 1
                } else {
                    crash_count
                };

                DelayEstimate {
                    health: Health::Healthy,
                    crash_count,
                    delay: self.initial_delay,
                }
            }
            Health::Unhealthy => {
                let crash_count = crash_count.saturating_add(1);

                DelayEstimate {
                    health: Health::Unhealthy,
                    crash_count,
                    delay: self.backoff(crash_count),
                }
            }
        }
    }

    /// Delay for an unhealthy exit at the given crash count.
    ///
    /// `initial_delay` up to `healthy_crash_count`, then
    /// `initial_delay × 2^(crash_count − healthy_crash_count)` clamped to
    /// `max_delay`. Monotonic in `crash_count`.
    pub fn backoff(&self, crash_count: u32) -> Duration {
        let excess = crash_count.saturating_sub(self.healthy_crash_count);
        if excess == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        1u32.checked_shl(excess)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Estimate the next restart delay with the default minimal and maximal delays.
pub fn estimate_delay(
    elapsed: Duration,
    healthy_threshold: Duration,
    crash_count: u32,
    healthy_crash_count: u32,
) -> DelayEstimate {
    RestartPolicy {
        healthy_threshold,
        healthy_crash_count,
        ..RestartPolicy::default()
    }
    .estimate(elapsed, crash_count)
}

//! Windowed consumable quota per miner with lazy rollover.
//!
//! There is no background timer: every access first checks whether the current
//! window has elapsed and, if so, treats the quota as refilled. Readers get the
//! same answer through [`RateLimitRecord::remaining_at`] without mutating.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Quota size and refill window for one miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub capacity: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(capacity: u64, window: Duration) -> Self {
        Self { capacity, window }
    }

    /// Windows are tracked in whole milliseconds; anything shorter is rejected.
    pub fn validate(&self) -> Result<(), String> {
        if self.window < Duration::from_millis(1) {
            return Err(format!("window {:?} is shorter than 1ms", self.window));
        }
        Ok(())
    }
}

/// Window length in milliseconds, never zero so a window can not refill on every access.
fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Result of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    /// Quota left after the attempt (unchanged when denied).
    pub remaining: u64,
}

/// Rate limit counters for one miner. Also the persisted form on the hot-counter side of storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    capacity: u64,
    window_millis: u64,
    remaining: u64,
    /// Milliseconds since the UNIX epoch.
    window_start: u64,
    /// True when the policy was set for this miner rather than inherited from the defaults.
    #[serde(default)]
    overridden: bool,
}

impl RateLimitRecord {
    /// Fresh record with a full window starting at `now`.
    pub fn new(policy: RateLimitPolicy, now: u64) -> Self {
        Self {
            capacity: policy.capacity,
            window_millis: window_millis(policy.window),
            remaining: policy.capacity,
            window_start: now,
            overridden: false,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden
    }

    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.capacity, self.window())
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.window_start) >= self.window_millis.max(1)
    }

    /// Remaining quota as observed at `now`, with rollover applied but not stored.
    pub fn remaining_at(&self, now: u64) -> u64 {
        if self.is_expired(now) {
            self.capacity
        } else {
            self.remaining
        }
    }

    /// Headroom as a fraction of capacity in `[0, 1]`. Zero-capacity records have no headroom.
    pub fn headroom_at(&self, now: u64) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.remaining_at(now) as f64 / self.capacity as f64
    }

    /// Start a new window if the current one elapsed. Returns true if a rollover happened.
    pub fn roll_over(&mut self, now: u64) -> bool {
        if !self.is_expired(now) {
            return false;
        }
        self.remaining = self.capacity;
        self.window_start = now;
        true
    }

    /// Check-then-decrement. Callers must hold exclusive access to the record.
    pub fn consume(&mut self, amount: u64, now: u64) -> ConsumeOutcome {
        self.consume_up_to(amount, self.capacity, now)
    }

    /// Largest per-window usage allowed when only `threshold` of the capacity may be spent.
    pub fn ceiling_for(&self, threshold: f64) -> u64 {
        ((self.capacity as f64) * threshold).floor().min(self.capacity as f64) as u64
    }

    /// Like [`Self::consume`], but usage in the window may not exceed `ceiling`.
    ///
    /// The rest of the capacity stays in reserve for other callers.
    pub fn consume_up_to(&mut self, amount: u64, ceiling: u64, now: u64) -> ConsumeOutcome {
        self.roll_over(now);
        let used = self.capacity.saturating_sub(self.remaining);
        if used.saturating_add(amount) <= ceiling.min(self.capacity) {
            self.remaining -= amount;
            ConsumeOutcome {
                allowed: true,
                remaining: self.remaining,
            }
        } else {
            ConsumeOutcome {
                allowed: false,
                remaining: self.remaining,
            }
        }
    }

    /// Replace the capacity and window for this miner, marking it as overridden.
    pub fn set_policy(&mut self, policy: RateLimitPolicy) {
        self.apply_policy(policy);
        self.overridden = true;
    }

    /// Follow new shared defaults unless this miner has its own policy.
    pub fn inherit_defaults(&mut self, defaults: RateLimitPolicy) {
        if !self.overridden {
            self.apply_policy(defaults);
        }
    }

    /// Quota already spent in the current window carries over to the new capacity.
    fn apply_policy(&mut self, policy: RateLimitPolicy) {
        let used = self.capacity.saturating_sub(self.remaining);
        self.capacity = policy.capacity;
        self.window_millis = window_millis(policy.window);
        self.remaining = self.capacity.saturating_sub(used);
    }
}

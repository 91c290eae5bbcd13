//! Credential attempt limiting
//!
//! The engine does not count failed unlock attempts; that is caller policy.
//! This limiter is the policy `ckosd` applies: a token bucket measured in
//! device UTC seconds so it behaves identically under mock clocks.

/// Token-bucket limiter for credential attempts
#[derive(Debug, Clone)]
pub struct AttemptLimiter {
    /// Maximum attempts per window
    max_attempts: u32,
    /// Window after which the bucket is refilled
    window_seconds: u32,
    tokens: u32,
    last_refill_utc: u32,
}

impl AttemptLimiter {
    /// Create a new limiter
    ///
    /// # Arguments
    /// * `max_attempts` - Maximum attempts allowed per window
    /// * `window_seconds` - Length of the window
    pub fn new(max_attempts: u32, window_seconds: u32) -> Self {
        Self {
            max_attempts,
            window_seconds,
            tokens: max_attempts,
            last_refill_utc: 0,
        }
    }

    fn refill(&mut self, now_utc: u32) {
        let elapsed = now_utc.saturating_sub(self.last_refill_utc);
        if self.window_seconds == 0 || elapsed >= self.window_seconds {
            self.tokens = self.max_attempts;
            self.last_refill_utc = now_utc;
        }
    }

    /// Whether a credential may be presented right now. Does not consume.
    pub fn allows(&mut self, now_utc: u32) -> bool {
        self.refill(now_utc);
        self.tokens > 0
    }

    /// Count a rejected credential against the budget
    pub fn record_failure(&mut self, now_utc: u32) {
        self.refill(now_utc);
        self.tokens = self.tokens.saturating_sub(1);
    }

    /// Seconds until the next attempt is allowed (0 if allowed now)
    pub fn retry_after(&self, now_utc: u32) -> u32 {
        if self.tokens > 0 {
            return 0;
        }
        let elapsed = now_utc.saturating_sub(self.last_refill_utc);
        self.window_seconds.saturating_sub(elapsed)
    }

    /// Restore the full budget, e.g. after a successful unlock
    pub fn reset(&mut self, now_utc: u32) {
        self.tokens = self.max_attempts;
        self.last_refill_utc = now_utc;
    }
}

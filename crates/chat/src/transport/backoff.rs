// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Capped exponential backoff over a bounded number of attempts.
///
/// Retry `n` (zero-based) waits `base * 2^n`, capped at `max_delay`. Every
/// attempt, charged or scheduled, counts against `max_attempts`; once they
/// are spent [`next_delay`](Self::next_delay) returns `None`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
    /// Attempts spent since the last reset.
    spent: u32,
    /// Delays handed out since the last reset.
    retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self { base, max_delay, max_attempts, spent: 0, retries: 0 }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    /// Count an attempt made without waiting (the opening dial).
    pub fn charge(&mut self) {
        self.spent = self.spent.saturating_add(1);
    }

    /// Spend one attempt, returning how long to wait before making it.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.spent >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for(self.retries);
        self.retries += 1;
        self.spent += 1;
        Some(delay)
    }

    /// One-based number of the most recently spent attempt.
    pub fn attempt(&self) -> u32 {
        self.spent
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn reset(&mut self) {
        self.spent = 0;
        self.retries = 0;
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;

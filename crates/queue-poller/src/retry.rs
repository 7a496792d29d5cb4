//! # Fetch Backoff Module
//!
//! Decides how long the poll loop waits after a failed fetch before trying again.
//!
//! The default policy waits a fixed 5 seconds after every failure. Setting a
//! multiplier above 1.0 turns it into exponential backoff capped at
//! `max_delay_ms`, optionally with jitter to spread out reconnecting clients.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay applied after a failed fetch when no custom policy is configured
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_secs(5);

/// Backoff policy for failed fetches
///
/// # Examples
///
/// ```rust
/// use queue_poller::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: fixed 5s
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.calculate_delay(3), Duration::from_secs(5));
///
/// // Exponential: 1s, 2s, 4s, ... capped at 30s
/// let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(30), 2.0);
/// assert_eq!(policy.calculate_delay(2), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between retries, in milliseconds
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier (1.0 keeps the delay fixed)
    pub backoff_multiplier: f64,

    /// Jitter range as a fraction of the delay (0.0 disables jitter)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_FETCH_BACKOFF)
    }
}

impl RetryPolicy {
    /// Policy that always waits `delay`
    pub fn fixed(delay: Duration) -> Self {
        let delay_ms = duration_to_millis(delay);
        Self {
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1.0,
            jitter_percent: 0.0,
        }
    }

    /// Exponential policy without jitter
    pub fn exponential(initial_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay_ms: duration_to_millis(initial_delay),
            max_delay_ms: duration_to_millis(max_delay),
            backoff_multiplier,
            jitter_percent: 0.0,
        }
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a specific retry attempt
    ///
    /// Uses exponential backoff formula: delay = initial * multiplier^attempt,
    /// capped at `max_delay_ms`, then jittered if enabled. Out-of-range fields
    /// are treated as their [`normalized`](Self::normalized) values, so the
    /// result is always a valid delay.
    ///
    /// # Arguments
    ///
    /// * `attempt` - Retry attempt number (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let policy = self.clone().normalized();
        let initial_secs = policy.initial_delay_ms as f64 / 1000.0;
        let max_secs = policy.max_delay_ms as f64 / 1000.0;

        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay_secs = initial_secs * policy.backoff_multiplier.powi(exponent);

        let capped_delay_secs = if base_delay_secs.is_finite() {
            base_delay_secs.clamp(0.0, max_secs)
        } else {
            max_secs
        };

        let final_delay_secs = if policy.jitter_percent > 0.0 {
            Self::add_jitter(capped_delay_secs, policy.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::try_from_secs_f64(final_delay_secs)
            .unwrap_or(Duration::from_millis(policy.max_delay_ms))
    }

    /// Bring every field into the range the poll loop can work with
    ///
    /// A multiplier below 1.0 or not finite becomes 1.0, jitter is clamped to
    /// 0.0..=1.0 (NaN disables it) and `max_delay_ms` is raised to at least
    /// `initial_delay_ms`.
    pub fn normalized(mut self) -> Self {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            self.backoff_multiplier = 1.0;
        }

        self.jitter_percent = if self.jitter_percent.is_nan() {
            0.0
        } else {
            self.jitter_percent.clamp(0.0, 1.0)
        };

        self.max_delay_ms = self.max_delay_ms.max(self.initial_delay_ms);
        self
    }

    /// Check the policy for values the poll loop cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(format!(
                "jitter_percent must be between 0.0 and 1.0, got {}",
                self.jitter_percent
            ));
        }

        if self.max_delay_ms < self.initial_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must not be smaller than initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            ));
        }

        Ok(())
    }

    /// Applies random variation in range [delay * (1-jitter), delay * (1+jitter)]
    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-jitter_range..=jitter_range);

        (delay_secs + jitter).max(0.0)
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Tracks consecutive fetch failures for the poll loop
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Consecutive failures since the last successful fetch
    pub consecutive_failures: u32,
}

impl RetryState {
    /// Create new retry state with no failures recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the delay to wait before the next attempt
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> Duration {
        let delay = policy.calculate_delay(self.consecutive_failures);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        delay
    }

    /// Reset after a successful fetch
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

//! Exponential backoff reconnection logic

use netconduit_common::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay
    pub base: Duration,
    /// Maximum delay
    pub max: Duration,
    /// Multiplier for each attempt
    pub factor: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for BackoffConfig {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base: config.delay,
            max: config.max_delay,
            factor: config.factor,
            jitter: config.jitter,
        }
    }
}

/// Exponential backoff calculator
///
/// Delays never shrink between consecutive attempts, even with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    /// Create a new backoff calculator
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Get the next delay and increment attempt counter
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.calculate_delay().max(self.last);
        self.last = delay;
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Reset the backoff (call after successful connection)
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }

    /// Get current attempt number
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    fn calculate_delay(&self) -> Duration {
        // Cap the exponent to avoid i32 wrap
        let base_secs = self.config.base.as_secs_f64();
        let attempt: i32 = self.attempt.min(i32::MAX as u32).try_into().unwrap_or(i32::MAX);
        let exp_delay = base_secs * self.config.factor.powi(attempt);

        let jitter_range = exp_delay * self.config.jitter;
        let jitter = if jitter_range > 0.0 && jitter_range.is_finite() {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let delay_with_jitter = (exp_delay + jitter).max(0.0);

        let final_secs = delay_with_jitter.min(self.config.max.as_secs_f64());

        Duration::from_secs_f64(final_secs)
    }
}

/// Reconnection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// Connected and running
    Connected,
    /// Waiting before the next attempt
    Backoff,
    /// Attempt in progress
    Reconnecting,
    /// Attempts exhausted
    Failed,
}

/// Bounded reconnection loop driver.
///
/// Each outage gets up to `max_attempts` connection cycles; a success resets
/// the counter for the next outage.
#[derive(Debug)]
pub struct ReconnectManager {
    backoff: Backoff,
    state: ReconnectState,
    max_attempts: u32,
}

impl ReconnectManager {
    /// Create a new reconnection manager
    #[must_use]
    pub fn new(config: BackoffConfig, max_attempts: u32) -> Self {
        Self {
            backoff: Backoff::new(config),
            state: ReconnectState::Connected,
            max_attempts,
        }
    }

    #[must_use]
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(BackoffConfig::from(config), config.attempts)
    }

    /// Mark connection as successful
    pub fn on_connected(&mut self) {
        self.backoff.reset();
        self.state = ReconnectState::Connected;
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if self.backoff.attempts() >= self.max_attempts {
            self.state = ReconnectState::Failed;
            return None;
        }

        self.state = ReconnectState::Backoff;
        Some(self.backoff.next_delay())
    }

    /// Mark as reconnecting (after backoff wait)
    pub fn start_reconnect(&mut self) {
        self.state = ReconnectState::Reconnecting;
    }

    /// Attempts made during the current outage
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> ReconnectState {
        self.state
    }
}

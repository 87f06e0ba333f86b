//! Exponential backoff reconnection logic.

use std::time::Duration;

use rand::Rng;

/// Configuration for exponential backoff reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for each successive attempt.
    pub multiplier: f64,
    /// Upper bound on random jitter added to each delay.
    pub jitter: Duration,
    /// Maximum number of attempts (None = unbounded).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 1.5,
            jitter: Duration::from_millis(1000),
            max_attempts: None,
        }
    }
}

/// Tracks reconnection state and calculates delays.
///
/// For attempt `n` (1-based) the delay is
/// `min(base * multiplier^(n-1) + jitter(0..jitter), max)`.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Returns the next delay, or None if max attempts exceeded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        self.attempts += 1;

        let jitter_ms = self.config.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };

        let raw = self.base_delay_for(self.attempts).as_millis() as u64 + jitter;
        Some(Duration::from_millis(
            raw.min(self.config.max_delay.as_millis() as u64),
        ))
    }

    /// Delay for a given attempt ignoring jitter: `min(base * m^(n-1), max)`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = self.config.multiplier.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.config.base_delay.as_millis() as f64 * exp)
            .min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }

    /// Reset state after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Get current attempt count.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

//! Heartbeat/liveness bookkeeping.
//!
//! TCP alone does not surface a half-open socket; liveness is proven by
//! requiring both a transport pong and steady message traffic. Thresholds
//! are deliberately looser than the probe cadence to tolerate jitter.

use std::time::Duration;

use tokio::time::Instant;

use crate::common::error::ConnectionError;

/// Liveness thresholds for one connection.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Transport ping cadence.
    pub ping_interval: Duration,
    /// Application-level probe cadence.
    pub probe_interval: Duration,
    /// Max silence after a ping before the connection counts as dead.
    pub pong_timeout: Duration,
    /// Max time without any received message (probe responses included).
    pub silence_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            probe_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(65),
            silence_timeout: Duration::from_secs(90),
        }
    }
}

/// Verdict of a liveness check.
#[derive(Debug)]
pub enum LivenessVerdict {
    Healthy,
    /// Connection must be torn down and reconnected.
    Stale(ConnectionError),
}

/// Tracks received traffic for one connection epoch.
#[derive(Debug)]
pub struct Liveness {
    config: HeartbeatConfig,
    last_message: Instant,
    last_pong: Instant,
}

impl Liveness {
    pub fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_message: now,
            last_pong: now,
        }
    }

    /// Any received frame counts as traffic, including pongs.
    pub fn note_message(&mut self, now: Instant) {
        self.last_message = now;
    }

    pub fn note_pong(&mut self, now: Instant) {
        self.last_pong = now;
        self.last_message = now;
    }

    pub fn verdict(&self, now: Instant) -> LivenessVerdict {
        if now.duration_since(self.last_pong) > self.config.pong_timeout {
            return LivenessVerdict::Stale(ConnectionError::StalePong {
                timeout_secs: self.config.pong_timeout.as_secs(),
            });
        }
        if now.duration_since(self.last_message) > self.config.silence_timeout {
            return LivenessVerdict::Stale(ConnectionError::StaleStream {
                timeout_secs: self.config.silence_timeout.as_secs(),
            });
        }
        LivenessVerdict::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_connection_is_healthy() {
        let now = Instant::now();
        let liveness = Liveness::new(HeartbeatConfig::default(), now);
        assert!(matches!(liveness.verdict(now), LivenessVerdict::Healthy));
    }

    #[test]
    fn test_missing_pong_is_stale_after_65s() {
        let now = Instant::now();
        let mut liveness = Liveness::new(HeartbeatConfig::default(), now);

        // Messages keep flowing but pongs stopped.
        let later = now + Duration::from_secs(66);
        liveness.note_message(later);
        assert!(matches!(
            liveness.verdict(later),
            LivenessVerdict::Stale(ConnectionError::StalePong { timeout_secs: 65 })
        ));
    }

    #[test]
    fn test_silent_stream_is_stale_after_90s() {
        let now = Instant::now();
        let mut liveness = Liveness::new(HeartbeatConfig::default(), now);

        // Pongs keep arriving but no other traffic: pong counts as traffic,
        // so silence is measured from the last pong too.
        let later = now + Duration::from_secs(80);
        liveness.note_pong(later);
        assert!(matches!(liveness.verdict(later), LivenessVerdict::Healthy));

        let stale = later + Duration::from_secs(91);
        assert!(matches!(
            liveness.verdict(stale),
            LivenessVerdict::Stale(_)
        ));
    }

    #[test]
    fn test_pong_refreshes_liveness() {
        let now = Instant::now();
        let mut liveness = Liveness::new(HeartbeatConfig::default(), now);

        let t1 = now + Duration::from_secs(60);
        liveness.note_pong(t1);
        let t2 = t1 + Duration::from_secs(60);
        liveness.note_pong(t2);
        assert!(matches!(liveness.verdict(t2), LivenessVerdict::Healthy));
    }
}

//! Connection lifecycle state machine.
//!
//! Every physical connection attempt is tagged with a new epoch. Callbacks
//! carry the epoch they were created under; a mismatch against the current
//! epoch means the callback belongs to a superseded connection and must not
//! change state.

use std::collections::HashSet;
use std::time::Duration;

use crate::common::reconnect::{ReconnectConfig, ReconnectState};
use crate::common::types::ChannelId;

/// Lifecycle phase of the supervised connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting { attempt: u32 },
}

/// What the owner should do after a close notification.
#[derive(Debug, PartialEq)]
pub enum CloseAction {
    /// Close belongs to a superseded epoch; no state change.
    Ignore,
    /// Intentional close; do not schedule a reconnect.
    Intentional,
    /// Schedule a reconnect after the given delay.
    Reconnect { delay: Duration, attempt: u32 },
    /// Reconnect attempt cap reached.
    GiveUp,
}

/// State for one supervised endpoint connection.
#[derive(Debug)]
pub struct ConnectionState {
    phase: Phase,
    epoch: u64,
    intentional_close: bool,
    channels: HashSet<ChannelId>,
    reconnect: ReconnectState,
}

impl ConnectionState {
    pub fn new(channels: HashSet<ChannelId>, reconnect: ReconnectConfig) -> Self {
        Self {
            phase: Phase::Idle,
            epoch: 0,
            intentional_close: false,
            channels,
            reconnect: ReconnectState::new(reconnect),
        }
    }

    /// Start a new connection attempt. Returns the new epoch; all callbacks
    /// for this attempt must capture it.
    pub fn begin_connect(&mut self) -> u64 {
        self.epoch += 1;
        self.phase = Phase::Connecting;
        self.intentional_close = false;
        self.epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a callback captured under `epoch` may still change state.
    pub fn accepts(&self, epoch: u64) -> bool {
        epoch == self.epoch
    }

    /// Transition to Open; resets the reconnect attempt counter.
    /// Returns false (no state change) for a stale epoch.
    pub fn mark_open(&mut self, epoch: u64) -> bool {
        if !self.accepts(epoch) {
            return false;
        }
        self.phase = Phase::Open;
        self.reconnect.reset();
        true
    }

    /// Flag the upcoming close as intentional so the close notification
    /// does not also schedule a reconnect.
    pub fn begin_close(&mut self) {
        self.phase = Phase::Closing;
        self.intentional_close = true;
    }

    /// Handle a close notification from connection `epoch`.
    pub fn handle_close(&mut self, epoch: u64) -> CloseAction {
        if !self.accepts(epoch) {
            return CloseAction::Ignore;
        }
        if self.intentional_close {
            self.phase = Phase::Idle;
            return CloseAction::Intentional;
        }
        match self.reconnect.next_delay() {
            Some(delay) => {
                let attempt = self.reconnect.attempts();
                self.phase = Phase::Reconnecting { attempt };
                CloseAction::Reconnect { delay, attempt }
            }
            None => {
                self.phase = Phase::Idle;
                CloseAction::GiveUp
            }
        }
    }

    /// Replace the monitored channel set in place. Used by the idempotent
    /// connect path instead of opening a second connection.
    pub fn set_channels(&mut self, channels: HashSet<ChannelId>) {
        self.channels = channels;
    }

    pub fn monitors(&self, channel_id: &ChannelId) -> bool {
        self.channels.contains(channel_id)
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Health string for status snapshots.
    pub fn health(&self) -> String {
        match &self.phase {
            Phase::Idle => "idle".to_string(),
            Phase::Connecting => format!("connecting (epoch {})", self.epoch),
            Phase::Open => format!("open (epoch {})", self.epoch),
            Phase::Closing => "closing".to_string(),
            Phase::Reconnecting { attempt } => {
                format!("reconnecting (attempt {}, epoch {})", attempt, self.epoch)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter: Duration::ZERO,
            ..ReconnectConfig::default()
        }
    }

    fn channels(ids: &[&str]) -> HashSet<ChannelId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_epoch_increments_per_attempt() {
        let mut state = ConnectionState::new(channels(&["c1"]), no_jitter());
        assert_eq!(state.begin_connect(), 1);
        assert_eq!(state.begin_connect(), 2);
        assert_eq!(state.current_epoch(), 2);
    }

    #[test]
    fn test_stale_epoch_close_is_ignored() {
        let mut state = ConnectionState::new(channels(&["c1"]), no_jitter());
        let old = state.begin_connect();
        let new = state.begin_connect();

        // A slow close notification from the superseded connection must not
        // schedule anything.
        assert_eq!(state.handle_close(old), CloseAction::Ignore);
        assert_eq!(state.phase(), &Phase::Connecting);

        // The current connection's close does.
        assert!(matches!(
            state.handle_close(new),
            CloseAction::Reconnect { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_stale_epoch_open_is_ignored() {
        let mut state = ConnectionState::new(channels(&[]), no_jitter());
        let old = state.begin_connect();
        state.begin_connect();
        assert!(!state.mark_open(old));
        assert_eq!(state.phase(), &Phase::Connecting);
    }

    #[test]
    fn test_intentional_close_skips_reconnect() {
        let mut state = ConnectionState::new(channels(&[]), no_jitter());
        let epoch = state.begin_connect();
        state.mark_open(epoch);
        state.begin_close();
        assert_eq!(state.handle_close(epoch), CloseAction::Intentional);
        assert_eq!(state.phase(), &Phase::Idle);
    }

    #[test]
    fn test_backoff_delays_follow_formula() {
        let mut state = ConnectionState::new(channels(&[]), no_jitter());

        let epoch = state.begin_connect();
        match state.handle_close(epoch) {
            CloseAction::Reconnect { delay, attempt } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(5000));
            }
            other => panic!("unexpected action: {:?}", other),
        }

        let epoch = state.begin_connect();
        match state.handle_close(epoch) {
            CloseAction::Reconnect { delay, attempt } => {
                assert_eq!(attempt, 2);
                assert_eq!(delay, Duration::from_millis(7500));
            }
            other => panic!("unexpected action: {:?}", other),
        }

        // A successful open resets the counter.
        let epoch = state.begin_connect();
        assert!(state.mark_open(epoch));
        match state.handle_close(epoch) {
            CloseAction::Reconnect { delay, attempt } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(5000));
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_attempt_cap_gives_up() {
        let mut state = ConnectionState::new(
            channels(&[]),
            ReconnectConfig {
                max_attempts: Some(1),
                jitter: Duration::ZERO,
                ..ReconnectConfig::default()
            },
        );
        let epoch = state.begin_connect();
        assert!(matches!(
            state.handle_close(epoch),
            CloseAction::Reconnect { .. }
        ));
        let epoch = state.begin_connect();
        assert_eq!(state.handle_close(epoch), CloseAction::GiveUp);
    }

    #[test]
    fn test_channel_set_updated_in_place() {
        let mut state = ConnectionState::new(channels(&["c1"]), no_jitter());
        assert!(state.monitors(&"c1".to_string()));
        assert!(!state.monitors(&"c2".to_string()));

        state.set_channels(channels(&["c2", "c3"]));
        assert!(!state.monitors(&"c1".to_string()));
        assert!(state.monitors(&"c2".to_string()));
    }
}

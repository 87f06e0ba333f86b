//! Connection supervision: keeps one event-stream connection to the source
//! endpoint alive, feeds decoded message events to the relay, and owns every
//! reconnect/heartbeat/session decision.
//!
//! The supervisor runs as a single task. Each physical connection attempt is
//! an epoch tracked by [`ConnectionState`]; close handling for superseded
//! epochs is ignored there, so a slow teardown can never double-schedule a
//! reconnect.

pub mod heartbeat;
pub mod state;

pub use heartbeat::HeartbeatConfig;
pub use state::{CloseAction, ConnectionState};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::api::ServerApi;
use crate::client::transport::{EventStreamHandle, EventTransport, StreamFrame};
use crate::common::error::ConnectionError;
use crate::common::reconnect::ReconnectConfig;
use crate::common::types::{ChannelId, MessageEvent};
use crate::supervisor::heartbeat::{Liveness, LivenessVerdict};

/// Tunables for one supervised connection.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    /// Periodic session re-validation cadence.
    pub revalidate_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            revalidate_interval: Duration::from_secs(180),
        }
    }
}

/// Control surface handed to the owner of a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    channels_tx: watch::Sender<HashSet<ChannelId>>,
    shutdown_tx: watch::Sender<bool>,
    health_rx: watch::Receiver<String>,
}

impl SupervisorHandle {
    /// Point the supervisor at a channel set. Idempotent: if a connection is
    /// already live, the monitored set is replaced in place instead of
    /// opening a second connection.
    pub fn connect(&self, channels: HashSet<ChannelId>) {
        let _ = self.channels_tx.send(channels);
    }

    /// Request an intentional close. The supervisor will not reconnect.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Current connection health, e.g. "open (epoch 3)".
    pub fn health(&self) -> String {
        self.health_rx.borrow().clone()
    }
}

/// How one served connection ended.
enum Served {
    /// Intentional close requested through the handle.
    Shutdown,
    /// Stream ended, errored, or went stale.
    Failed,
    /// The event consumer dropped its receiver; nothing left to serve.
    ConsumerGone,
}

pub struct ConnectionSupervisor {
    api: Arc<dyn ServerApi>,
    transport: Arc<dyn EventTransport>,
    config: SupervisorConfig,
    state: ConnectionState,
    event_tx: mpsc::Sender<MessageEvent>,
    channels_rx: watch::Receiver<HashSet<ChannelId>>,
    shutdown_rx: watch::Receiver<bool>,
    health_tx: watch::Sender<String>,
}

impl ConnectionSupervisor {
    pub fn new(
        api: Arc<dyn ServerApi>,
        transport: Arc<dyn EventTransport>,
        config: SupervisorConfig,
        event_tx: mpsc::Sender<MessageEvent>,
    ) -> (Self, SupervisorHandle) {
        let (channels_tx, channels_rx) = watch::channel(HashSet::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (health_tx, health_rx) = watch::channel("idle".to_string());

        let state = ConnectionState::new(HashSet::new(), config.reconnect.clone());
        let supervisor = Self {
            api,
            transport,
            config,
            state,
            event_tx,
            channels_rx,
            shutdown_rx,
            health_tx,
        };
        let handle = SupervisorHandle {
            channels_tx,
            shutdown_tx,
            health_rx,
        };
        (supervisor, handle)
    }

    /// Connect-serve-reconnect loop. Returns when an intentional close was
    /// requested, the reconnect attempt cap was reached, or the event
    /// consumer went away.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let epoch = self.state.begin_connect();
            self.state.set_channels(self.channels_rx.borrow().clone());
            self.publish_health();

            let handle = match self.establish().await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(epoch, error = %e, "failed to establish connection");
                    if self.handle_closed(epoch).await {
                        break;
                    }
                    continue;
                }
            };

            self.state.mark_open(epoch);
            self.publish_health();
            info!(epoch, "connection open");

            let served = self.serve(handle, epoch).await;

            // An unexpected close is often the first symptom of a revoked
            // session; check it before dialing again.
            if matches!(served, Served::Failed) {
                self.revalidate_session().await;
            }

            if self.handle_closed(epoch).await {
                break;
            }
        }

        let _ = self.health_tx.send("stopped".to_string());
        info!("connection supervisor stopped");
    }

    /// Login plus stream handshake for one attempt.
    async fn establish(&self) -> Result<Box<dyn EventStreamHandle>, ConnectionError> {
        let token = self
            .api
            .login()
            .await
            .map_err(|e| ConnectionError::Transport(format!("login failed: {}", e)))?;

        let mut handle = self.transport.open(&token).await?;
        handle
            .send("authentication_challenge", json!({ "token": token }))
            .await?;
        Ok(handle)
    }

    /// Serve one open connection until it ends.
    async fn serve(&mut self, mut handle: Box<dyn EventStreamHandle>, epoch: u64) -> Served {
        let now = Instant::now();
        let mut liveness = Liveness::new(self.config.heartbeat.clone(), now);

        let mut ping_interval = interval_at(
            now + self.config.heartbeat.ping_interval,
            self.config.heartbeat.ping_interval,
        );
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Offset from the transport ping so the two probes interleave.
        let mut probe_interval = interval_at(
            now + self.config.heartbeat.probe_interval / 2,
            self.config.heartbeat.probe_interval,
        );
        probe_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut revalidate_interval = interval_at(
            now + self.config.revalidate_interval,
            self.config.revalidate_interval,
        );
        revalidate_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut channels_rx = self.channels_rx.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                frame = handle.next_frame() => {
                    match frame {
                        Some(Ok(frame)) => {
                            liveness.note_message(Instant::now());
                            match frame {
                                StreamFrame::Hello => debug!(epoch, "event stream greeted"),
                                StreamFrame::Pong => liveness.note_pong(Instant::now()),
                                StreamFrame::Event(event) => {
                                    if self.state.monitors(event.channel_id()) {
                                        if self.event_tx.send(event).await.is_err() {
                                            self.state.begin_close();
                                            let _ = handle.close().await;
                                            return Served::ConsumerGone;
                                        }
                                    } else {
                                        debug!(
                                            channel_id = %event.channel_id(),
                                            "dropping event for unmonitored channel"
                                        );
                                    }
                                }
                                StreamFrame::Other(event) => debug!(epoch, event, "ignoring event"),
                            }
                        }
                        Some(Err(e)) => {
                            warn!(epoch, error = %e, "event stream error");
                            return Served::Failed;
                        }
                        None => {
                            warn!(epoch, "event stream closed by remote");
                            return Served::Failed;
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    if let LivenessVerdict::Stale(e) = liveness.verdict(Instant::now()) {
                        warn!(epoch, error = %e, "connection stale, forcing reconnect");
                        let _ = handle.close().await;
                        return Served::Failed;
                    }
                    if let Err(e) = handle.ping().await {
                        warn!(epoch, error = %e, "transport ping failed");
                        return Served::Failed;
                    }
                }

                _ = probe_interval.tick() => {
                    if let Err(e) = handle.send("ping", json!({})).await {
                        warn!(epoch, error = %e, "application probe failed");
                        return Served::Failed;
                    }
                }

                _ = revalidate_interval.tick() => {
                    if let Err(e) = self.api.validate_session().await {
                        if e.is_unauthorized() {
                            warn!(epoch, "session rejected, re-authenticating and reconnecting");
                            if let Err(e) = self.api.reauthenticate().await {
                                warn!(error = %e, "re-authentication failed");
                            }
                            let _ = handle.close().await;
                            return Served::Failed;
                        }
                        // Transient check failures do not force a teardown;
                        // the heartbeat will catch a dead connection.
                        warn!(epoch, error = %e, "session check failed");
                    }
                }

                _ = channels_rx.changed() => {
                    let channels = channels_rx.borrow_and_update().clone();
                    info!(count = channels.len(), "monitored channel set replaced");
                    self.state.set_channels(channels);
                }

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(epoch, "closing connection on request");
                        self.state.begin_close();
                        let _ = handle.close().await;
                        return Served::Shutdown;
                    }
                }
            }
        }
    }

    /// Session check after an unexpected close. A rejected session is
    /// re-authenticated immediately so the next attempt starts clean.
    async fn revalidate_session(&self) {
        match self.api.validate_session().await {
            Ok(()) => {}
            Err(e) if e.is_unauthorized() => {
                info!("session invalid after close, re-authenticating");
                if let Err(e) = self.api.reauthenticate().await {
                    warn!(error = %e, "re-authentication failed");
                }
            }
            Err(e) => debug!(error = %e, "session check failed after close"),
        }
    }

    /// Apply the close decision for `epoch`. Returns true when the run loop
    /// should stop.
    async fn handle_closed(&mut self, epoch: u64) -> bool {
        match self.state.handle_close(epoch) {
            CloseAction::Ignore => false,
            CloseAction::Intentional => true,
            CloseAction::GiveUp => {
                error!("reconnect attempt cap reached, giving up");
                true
            }
            CloseAction::Reconnect { delay, attempt } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.publish_health();

                let mut shutdown_rx = self.shutdown_rx.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => false,
                    _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
                }
            }
        }
    }

    fn publish_health(&self) {
        let _ = self.health_tx.send(self.state.health());
    }
}

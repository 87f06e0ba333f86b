//! Relay orchestrator.
//!
//! Owns the startup sequence and the live event loop: authenticate both
//! endpoints, resolve the configured channel routes, replay the backlog,
//! then supervise the source event stream and feed the forward pipeline.
//! Startup failures are fatal; everything after startup degrades or
//! reconnects instead of exiting.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::client::api::ServerApi;
use crate::client::http::HttpServerApi;
use crate::client::transport::EventTransport;
use crate::client::ws::WsTransport;
use crate::common::types::ChannelId;
use crate::config::types::Config;
use crate::relay::catchup::CatchUpReplayer;
use crate::relay::filter::ContentFilter;
use crate::relay::pipeline::ForwardPipeline;
use crate::relay::watermark::WatermarkStore;
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig};

const EVENT_QUEUE_CAPACITY: usize = 256;
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    source: Arc<dyn ServerApi>,
    destination: Arc<dyn ServerApi>,
    transport: Arc<dyn EventTransport>,
    config: Config,
}

impl Orchestrator {
    /// Build the production endpoints from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let source = Arc::new(
            HttpServerApi::new(
                &config.source.url,
                &config.source.username,
                &config.source.password,
            )
            .context("failed to build source client")?,
        );
        let destination = Arc::new(
            HttpServerApi::new(
                &config.destination.url,
                &config.destination.username,
                &config.destination.password,
            )
            .context("failed to build destination client")?,
        );
        let transport = Arc::new(WsTransport::new(&config.source.websocket_url()));
        Ok(Self::new(source, destination, transport, config))
    }

    pub fn new(
        source: Arc<dyn ServerApi>,
        destination: Arc<dyn ServerApi>,
        transport: Arc<dyn EventTransport>,
        config: Config,
    ) -> Self {
        Self {
            source,
            destination,
            transport,
            config,
        }
    }

    /// Run the relay until `shutdown_rx` flips or the supervisor gives up.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        self.source
            .login()
            .await
            .context("source endpoint login failed")?;
        self.destination
            .login()
            .await
            .context("destination endpoint login failed")?;
        info!("authenticated against both endpoints");

        let routes = self.resolve_routes().await?;

        let options = self.config.relay_options();
        if options.dry_run {
            info!("dry run enabled, the destination will not be written");
        }

        let filter = ContentFilter::from_config(self.config.filters.as_ref());
        if filter.has_patterns() {
            info!("content exclusion patterns enabled");
        }

        let watermark_path = self.config.watermark_file();
        let watermarks = WatermarkStore::open(Path::new(&watermark_path));
        let pipeline = Arc::new(ForwardPipeline::new(
            self.source.clone(),
            self.destination.clone(),
            routes.clone(),
            source_label(&self.config.source.url),
            options.clone(),
            filter,
            watermarks,
        ));

        // Drain the backlog before going live so catch-up and live traffic
        // cannot interleave out of order.
        let replayer = CatchUpReplayer::new(
            self.source.clone(),
            pipeline.clone(),
            self.config.catchup_options(),
        );
        replayer.replay_all().await;

        let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (supervisor, handle) = ConnectionSupervisor::new(
            self.source.clone(),
            self.transport.clone(),
            SupervisorConfig::default(),
            event_tx,
        );
        handle.connect(routes.keys().cloned().collect());
        let supervisor_task = tokio::spawn(supervisor.run());

        let mut status_interval =
            interval_at(Instant::now() + options.status_interval, options.status_interval);
        status_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => {
                            pipeline.handle_event(&event).await;
                        }
                        // The supervisor holds the only sender; it exited.
                        None => {
                            warn!("event stream supervision ended");
                            break;
                        }
                    }
                }

                _ = status_interval.tick() => {
                    let status = pipeline.status(handle.health());
                    info!(
                        events_seen = status.events_seen,
                        forwarded = status.forwarded,
                        excluded = status.excluded,
                        edits_applied = status.edits_applied,
                        edits_dropped = status.edits_dropped,
                        replayed = status.replayed,
                        attachment_failures = status.attachment_failures,
                        connection = %status.connection_health,
                        "relay status"
                    );
                }

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("stopping relay");
                        break;
                    }
                }
            }
        }

        handle.stop();
        match tokio::time::timeout(STOP_TIMEOUT, supervisor_task).await {
            Ok(Ok(())) => info!("connection closed"),
            Ok(Err(e)) => warn!(error = %e, "supervisor task panicked"),
            Err(_) => warn!("connection close timed out"),
        }

        let status = pipeline.status("stopped".to_string());
        info!(
            forwarded = status.forwarded,
            replayed = status.replayed,
            "relay stopped"
        );
        Ok(())
    }

    /// Resolve every configured mapping against both endpoints. A missing
    /// channel on either side is a configuration error and fatal.
    async fn resolve_routes(&self) -> Result<HashMap<ChannelId, ChannelId>> {
        let mut routes = HashMap::new();
        for mapping in &self.config.channels {
            let source_channel = self
                .source
                .fetch_channel(&mapping.source)
                .await
                .with_context(|| format!("source channel '{}' not found", mapping.source))?;
            let destination_channel = self
                .destination
                .fetch_channel(&mapping.destination)
                .await
                .with_context(|| {
                    format!("destination channel '{}' not found", mapping.destination)
                })?;

            info!(
                source = %source_channel.name,
                destination = %destination_channel.name,
                "route resolved"
            );
            routes.insert(mapping.source.clone(), mapping.destination.clone());
        }
        Ok(routes)
    }
}

/// Short server name for the provenance footer.
fn source_label(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

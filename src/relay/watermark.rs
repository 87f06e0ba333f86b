//! Per-channel forwarding watermarks.
//!
//! The watermark records the last successfully forwarded message per source
//! channel so the catch-up replayer knows where to resume after a restart
//! or an outage. The document is small; every update rewrites the whole
//! file. When the file cannot be written the store degrades to memory-only
//! operation with a single warning, trading catch-up precision for uptime.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::types::{ChannelId, MessageId, TimestampMs};

const DOCUMENT_VERSION: u32 = 1;

/// Last forwarded message for one source channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelWatermark {
    pub message_id: MessageId,
    /// Source-side creation timestamp of the message.
    pub timestamp: TimestampMs,
    /// When this watermark was written.
    pub updated_at: TimestampMs,
}

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkDocument {
    version: u32,
    channels: HashMap<ChannelId, ChannelWatermark>,
}

#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    channels: HashMap<ChannelId, ChannelWatermark>,
    /// Set after the first failed write; suppresses repeat warnings.
    persist_failed: bool,
}

impl WatermarkStore {
    /// Open the store at `path`. A missing file starts empty; an unreadable
    /// or incompatible document is discarded with a warning rather than
    /// blocking startup.
    pub fn open(path: &Path) -> Self {
        let channels = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<WatermarkDocument>(&text) {
                Ok(doc) if doc.version == DOCUMENT_VERSION => doc.channels,
                Ok(doc) => {
                    warn!(
                        path = %path.display(),
                        version = doc.version,
                        "unsupported watermark document version, starting fresh"
                    );
                    HashMap::new()
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "unreadable watermark document, starting fresh"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read watermark document");
                HashMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            channels,
            persist_failed: false,
        }
    }

    pub fn last_recorded(&self, channel_id: &ChannelId) -> Option<&ChannelWatermark> {
        self.channels.get(channel_id)
    }

    /// Advance the channel's watermark to a forwarded message and persist.
    /// An older timestamp never regresses an existing watermark.
    pub fn record_forward(
        &mut self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        timestamp: TimestampMs,
    ) {
        if let Some(existing) = self.channels.get(channel_id) {
            if timestamp < existing.timestamp {
                debug!(
                    channel_id = %channel_id,
                    message_id = %message_id,
                    "out-of-order forward, keeping newer watermark"
                );
                return;
            }
        }

        self.channels.insert(
            channel_id.clone(),
            ChannelWatermark {
                message_id: message_id.clone(),
                timestamp,
                updated_at: Utc::now().timestamp_millis(),
            },
        );
        self.persist();
    }

    fn persist(&mut self) {
        let doc = WatermarkDocument {
            version: DOCUMENT_VERSION,
            channels: self.channels.clone(),
        };
        let text = match serde_json::to_string_pretty(&doc) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to serialize watermark document");
                return;
            }
        };

        match fs::write(&self.path, text) {
            Ok(()) => {
                if self.persist_failed {
                    debug!(path = %self.path.display(), "watermark persistence recovered");
                    self.persist_failed = false;
                }
            }
            Err(e) => {
                if !self.persist_failed {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "cannot persist watermarks, continuing memory-only"
                    );
                    self.persist_failed = true;
                }
            }
        }
    }
}

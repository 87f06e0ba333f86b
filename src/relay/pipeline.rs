//! The forward pipeline: one source event in, at most one destination
//! write out.
//!
//! Every failure here is scoped to the message being handled; the pipeline
//! logs it with the source message id and moves on. Locks guard plain maps
//! and are never held across an await.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::client::api::{PostAttachment, ServerApi, User};
use crate::common::error::RelayError;
use crate::common::types::{
    ChannelId, FileId, MessageEvent, MessageId, NormalizedMessageEvent, RelayStatus, TimestampMs,
    UserId,
};
use crate::config::types::RelayOptions;
use crate::relay::filter::ContentFilter;
use crate::relay::identity::{AvatarEntry, IdentityCache};
use crate::relay::records::ForwardedRecords;
use crate::relay::stats::RelayStats;
use crate::relay::watermark::WatermarkStore;

/// What the pipeline did with one event.
#[derive(Debug)]
pub enum ForwardOutcome {
    Forwarded(MessageId),
    Edited,
    /// Dry run: decision logged, destination untouched.
    DryRun,
    /// Source message already forwarded.
    Duplicate,
    /// Same source message currently being forwarded.
    InFlight,
    /// No destination channel mapped for the source channel.
    Unrouted,
    ExcludedAuthor,
    ExcludedContent,
    /// Edit with no forwardable target; dropped.
    EditDropped,
    Failed(RelayError),
}

struct PipelineState {
    records: ForwardedRecords,
    identity: IdentityCache,
    /// Source message ids currently being forwarded.
    in_flight: HashSet<MessageId>,
}

pub struct ForwardPipeline {
    source: Arc<dyn ServerApi>,
    destination: Arc<dyn ServerApi>,
    /// Source channel -> destination channel.
    routes: HashMap<ChannelId, ChannelId>,
    /// Short name of the source server, rendered in the provenance footer.
    source_label: String,
    options: RelayOptions,
    filter: ContentFilter,
    state: Mutex<PipelineState>,
    watermarks: Mutex<WatermarkStore>,
    stats: RelayStats,
}

impl ForwardPipeline {
    pub fn new(
        source: Arc<dyn ServerApi>,
        destination: Arc<dyn ServerApi>,
        routes: HashMap<ChannelId, ChannelId>,
        source_label: String,
        options: RelayOptions,
        filter: ContentFilter,
        watermarks: WatermarkStore,
    ) -> Self {
        let state = PipelineState {
            records: ForwardedRecords::new(options.forwarded_capacity),
            identity: IdentityCache::new(),
            in_flight: HashSet::new(),
        };
        Self {
            source,
            destination,
            routes,
            source_label,
            options,
            filter,
            state: Mutex::new(state),
            watermarks: Mutex::new(watermarks),
            stats: RelayStats::new(),
        }
    }

    /// Handle one supervised event.
    pub async fn handle_event(&self, event: &MessageEvent) -> ForwardOutcome {
        self.stats.note_event();
        match event {
            MessageEvent::Posted(ev) => self.forward(ev).await,
            MessageEvent::Edited(ev) => self.apply_edit(ev).await,
        }
    }

    /// Source channels this pipeline routes.
    pub fn source_channels(&self) -> Vec<ChannelId> {
        self.routes.keys().cloned().collect()
    }

    /// Watermark timestamp for a source channel, if one was ever recorded.
    pub fn watermark_timestamp(&self, channel_id: &ChannelId) -> Option<TimestampMs> {
        self.watermarks
            .lock()
            .unwrap()
            .last_recorded(channel_id)
            .map(|wm| wm.timestamp)
    }

    pub fn note_replayed(&self) {
        self.stats.note_replayed();
    }

    pub fn status(&self, connection_health: String) -> RelayStatus {
        self.stats.snapshot(connection_health)
    }

    async fn forward(&self, ev: &NormalizedMessageEvent) -> ForwardOutcome {
        let Some(destination_channel) = self.routes.get(&ev.channel_id).cloned() else {
            debug!(
                message_id = %ev.id,
                channel_id = %ev.channel_id,
                "no route for channel, ignoring"
            );
            return ForwardOutcome::Unrouted;
        };

        {
            let mut state = self.state.lock().unwrap();
            if state.records.contains(&ev.id) {
                debug!(message_id = %ev.id, "already forwarded, ignoring duplicate");
                return ForwardOutcome::Duplicate;
            }
            if !state.in_flight.insert(ev.id.clone()) {
                debug!(message_id = %ev.id, "forward already in flight, ignoring duplicate");
                return ForwardOutcome::InFlight;
            }
        }

        let outcome = self.forward_guarded(ev, &destination_channel).await;

        self.state.lock().unwrap().in_flight.remove(&ev.id);
        outcome
    }

    /// Forward body; the caller holds the in-flight guard for `ev.id`.
    async fn forward_guarded(
        &self,
        ev: &NormalizedMessageEvent,
        destination_channel: &ChannelId,
    ) -> ForwardOutcome {
        let author = match self.resolve_author(ev).await {
            Ok(author) => author,
            Err(e) => {
                warn!(message_id = %ev.id, error = %e, "dropping message");
                return ForwardOutcome::Failed(e);
            }
        };

        if self.author_excluded(&author) {
            debug!(
                message_id = %ev.id,
                author = %author.username,
                "author domain excluded, not forwarding"
            );
            self.stats.note_excluded();
            return ForwardOutcome::ExcludedAuthor;
        }

        if self.filter.excludes(&ev.body) {
            debug!(message_id = %ev.id, "content matched exclusion pattern, not forwarding");
            self.stats.note_excluded();
            return ForwardOutcome::ExcludedContent;
        }

        if self.options.dry_run {
            info!(
                message_id = %ev.id,
                channel_id = %ev.channel_id,
                author = ev.author_label(),
                body = %ev.body,
                "dry run: would forward message"
            );
            return ForwardOutcome::DryRun;
        }

        let icon = self.avatar_icon(&ev.author_id, destination_channel).await;
        let attachment = self.render_attachment(ev, icon).await;
        let file_ids = self.replicate_attachments(ev, destination_channel).await;

        match self
            .destination
            .post_message(destination_channel, "", &[attachment], &file_ids)
            .await
        {
            Ok(destination_id) => {
                self.state
                    .lock()
                    .unwrap()
                    .records
                    .insert(ev.id.clone(), destination_id.clone());
                self.watermarks.lock().unwrap().record_forward(
                    &ev.channel_id,
                    &ev.id,
                    ev.created_at,
                );
                self.stats.note_forwarded();
                debug!(
                    message_id = %ev.id,
                    destination_id = %destination_id,
                    "message forwarded"
                );
                ForwardOutcome::Forwarded(destination_id)
            }
            Err(e) => {
                let e = RelayError::PostFailed {
                    channel_id: destination_channel.clone(),
                    source: e,
                };
                warn!(message_id = %ev.id, error = %e, "dropping message");
                ForwardOutcome::Failed(e)
            }
        }
    }

    async fn apply_edit(&self, ev: &NormalizedMessageEvent) -> ForwardOutcome {
        let destination_id = {
            let state = self.state.lock().unwrap();
            state.records.get(&ev.id).cloned()
        };
        let Some(destination_id) = destination_id else {
            debug!(message_id = %ev.id, "edit for unknown or aged-out message, dropping");
            self.stats.note_edit_dropped();
            return ForwardOutcome::EditDropped;
        };

        if self.filter.excludes(&ev.body) {
            debug!(message_id = %ev.id, "edited content matched exclusion pattern, dropping");
            self.stats.note_excluded();
            return ForwardOutcome::ExcludedContent;
        }

        // Never patch a post the destination server generated itself.
        match self.destination.fetch_message(&destination_id).await {
            Ok(post) if post.is_system() => {
                warn!(
                    message_id = %ev.id,
                    destination_id = %destination_id,
                    "destination post is a system post, refusing to edit"
                );
                self.stats.note_edit_dropped();
                return ForwardOutcome::EditDropped;
            }
            Ok(_) => {}
            Err(e) => {
                let e = RelayError::UpdateFailed {
                    post_id: destination_id,
                    source: e,
                };
                warn!(message_id = %ev.id, error = %e, "dropping edit");
                self.stats.note_edit_dropped();
                return ForwardOutcome::Failed(e);
            }
        }

        // Avatar was replicated (or found absent) on the original forward;
        // edits reuse the cached result rather than re-replicating.
        let icon = {
            let state = self.state.lock().unwrap();
            match state.identity.avatar(&ev.author_id) {
                Some(AvatarEntry::Replicated(reference)) => Some(reference.clone()),
                _ => None,
            }
        };
        let attachment = self.render_attachment(ev, icon).await;

        match self
            .destination
            .update_message(&destination_id, "", &[attachment])
            .await
        {
            Ok(()) => {
                self.stats.note_edit_applied();
                debug!(
                    message_id = %ev.id,
                    destination_id = %destination_id,
                    "edit applied"
                );
                ForwardOutcome::Edited
            }
            Err(e) => {
                let e = RelayError::UpdateFailed {
                    post_id: destination_id,
                    source: e,
                };
                warn!(message_id = %ev.id, error = %e, "dropping edit");
                ForwardOutcome::Failed(e)
            }
        }
    }

    async fn resolve_author(&self, ev: &NormalizedMessageEvent) -> Result<User, RelayError> {
        let cached = {
            let state = self.state.lock().unwrap();
            state.identity.user(&ev.author_id).cloned()
        };
        if let Some(user) = cached {
            return Ok(user);
        }

        match self.source.fetch_user(&ev.author_id).await {
            Ok(user) => {
                self.state.lock().unwrap().identity.put_user(user.clone());
                Ok(user)
            }
            Err(e) => Err(RelayError::AuthorLookupFailed {
                user_id: ev.author_id.clone(),
                source: e,
            }),
        }
    }

    fn author_excluded(&self, author: &User) -> bool {
        let email = author.email.to_lowercase();
        self.options
            .excluded_domains
            .iter()
            .any(|domain| email.ends_with(domain))
    }

    /// Cached avatar replication: download from the source, upload to the
    /// destination once per user. Any failure degrades to no icon.
    async fn avatar_icon(
        &self,
        user_id: &UserId,
        destination_channel: &ChannelId,
    ) -> Option<String> {
        let cached = {
            let state = self.state.lock().unwrap();
            state.identity.avatar(user_id).cloned()
        };
        if let Some(entry) = cached {
            return match entry {
                AvatarEntry::Replicated(reference) => Some(reference),
                AvatarEntry::Absent => None,
            };
        }

        let entry = match self.source.download_avatar(user_id).await {
            Ok(Some(bytes)) => match self
                .destination
                .upload_avatar(bytes, destination_channel)
                .await
            {
                Ok(Some(reference)) => AvatarEntry::Replicated(reference),
                Ok(None) => {
                    debug!(user_id = %user_id, "avatar upload rejected, rendering without icon");
                    AvatarEntry::Absent
                }
                Err(e) => {
                    debug!(user_id = %user_id, error = %e, "avatar upload failed");
                    AvatarEntry::Absent
                }
            },
            Ok(None) => AvatarEntry::Absent,
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "avatar download failed");
                AvatarEntry::Absent
            }
        };

        self.state
            .lock()
            .unwrap()
            .identity
            .put_avatar(user_id.clone(), entry.clone());
        match entry {
            AvatarEntry::Replicated(reference) => Some(reference),
            AvatarEntry::Absent => None,
        }
    }

    async fn render_attachment(
        &self,
        ev: &NormalizedMessageEvent,
        icon: Option<String>,
    ) -> PostAttachment {
        let channel_name = self.channel_label(&ev.channel_id).await;
        let mut footer = format!(
            "{} | #{} | {}",
            self.source_label,
            channel_name,
            format_timestamp(ev.created_at)
        );
        if ev.edited_at.is_some() {
            footer.push_str(" (edited)");
        }

        PostAttachment {
            author_name: ev.author_label().to_string(),
            author_icon: icon,
            text: ev.body.clone(),
            footer,
        }
    }

    /// Source channel name for the footer; falls back to the raw id.
    async fn channel_label(&self, channel_id: &ChannelId) -> String {
        let cached = {
            let state = self.state.lock().unwrap();
            state.identity.channel_name(channel_id).map(str::to_string)
        };
        if let Some(name) = cached {
            return name;
        }

        let name = match self.source.fetch_channel(channel_id).await {
            Ok(channel) => channel.name,
            Err(e) => {
                debug!(channel_id = %channel_id, error = %e, "channel lookup failed");
                channel_id.clone()
            }
        };
        self.state
            .lock()
            .unwrap()
            .identity
            .put_channel_name(channel_id.clone(), name.clone());
        name
    }

    /// Replicate each attachment independently; a failed file is dropped
    /// from the forward rather than dropping the message.
    async fn replicate_attachments(
        &self,
        ev: &NormalizedMessageEvent,
        destination_channel: &ChannelId,
    ) -> Vec<FileId> {
        let mut file_ids = Vec::new();
        for file_id in &ev.attachment_ids {
            match self.replicate_file(file_id, destination_channel).await {
                Some(uploaded) => file_ids.push(uploaded),
                None => {
                    self.stats.note_attachment_failure();
                    warn!(
                        message_id = %ev.id,
                        file_id = %file_id,
                        "attachment not replicated, forwarding without it"
                    );
                }
            }
        }
        file_ids
    }

    async fn replicate_file(
        &self,
        file_id: &FileId,
        destination_channel: &ChannelId,
    ) -> Option<FileId> {
        let download = match self.source.download_file(file_id).await {
            Ok(Some(download)) => download,
            Ok(None) => return None,
            Err(e) => {
                debug!(file_id = %file_id, error = %e, "file download failed");
                return None;
            }
        };
        match self
            .destination
            .upload_file(download.bytes, &download.filename, destination_channel)
            .await
        {
            Ok(uploaded) => uploaded,
            Err(e) => {
                debug!(file_id = %file_id, error = %e, "file upload failed");
                None
            }
        }
    }
}

fn format_timestamp(ts: TimestampMs) -> String {
    match Utc.timestamp_millis_opt(ts).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => ts.to_string(),
    }
}

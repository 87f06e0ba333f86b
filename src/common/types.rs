//! Shared types used across the application.

/// Unique identifier for a channel on either endpoint.
pub type ChannelId = String;

/// Unique identifier for a user on either endpoint.
pub type UserId = String;

/// Unique identifier for a message/post.
pub type MessageId = String;

/// Unique identifier for an uploaded file.
pub type FileId = String;

/// Millisecond Unix timestamp, as reported by the messaging server.
pub type TimestampMs = i64;

/// A message event normalized at the stream decode boundary.
///
/// Immutable once constructed; the rest of the core never inspects a raw
/// stream payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessageEvent {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_username: String,
    pub author_display_name: String,
    pub body: String,
    pub created_at: TimestampMs,
    pub edited_at: Option<TimestampMs>,
    /// Attachment identifiers in the order they appeared on the source post.
    pub attachment_ids: Vec<FileId>,
}

impl NormalizedMessageEvent {
    /// Display name to render on the destination, falling back to username.
    pub fn author_label(&self) -> &str {
        if self.author_display_name.is_empty() {
            &self.author_username
        } else {
            &self.author_display_name
        }
    }
}

/// Tagged variants delivered by the connection supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    /// A new message was posted.
    Posted(NormalizedMessageEvent),
    /// An existing message was edited.
    Edited(NormalizedMessageEvent),
}

impl MessageEvent {
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            MessageEvent::Posted(ev) | MessageEvent::Edited(ev) => &ev.channel_id,
        }
    }
}

/// Periodic status snapshot suitable for logging or posting to an
/// operational channel. Format is not part of the core's contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayStatus {
    pub events_seen: u64,
    pub forwarded: u64,
    pub excluded: u64,
    pub edits_applied: u64,
    pub edits_dropped: u64,
    pub replayed: u64,
    pub attachment_failures: u64,
    /// Per-connection health string, e.g. "open (epoch 3)".
    pub connection_health: String,
}

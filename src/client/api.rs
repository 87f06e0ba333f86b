//! REST-side contract for one messaging server endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::error::ApiResult;
use crate::common::types::{ChannelId, FileId, MessageId, TimestampMs, UserId};

/// Channel metadata as reported by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub channel_type: String,
}

/// User metadata as reported by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

/// A post fetched from the server (history API or single lookup).
#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    #[serde(default)]
    pub message: String,
    pub create_at: TimestampMs,
    #[serde(default)]
    pub edit_at: TimestampMs,
    #[serde(default)]
    pub file_ids: Vec<FileId>,
    /// Empty for user posts; server-generated posts carry a marker type.
    #[serde(rename = "type", default)]
    pub post_type: String,
}

impl Post {
    /// Whether the server authored this post itself. System posts must
    /// never be targeted for edit.
    pub fn is_system(&self) -> bool {
        !self.post_type.is_empty()
    }
}

/// A downloaded file with its original name.
#[derive(Debug, Clone)]
pub struct FileDownload {
    pub bytes: Vec<u8>,
    pub filename: String,
}

/// Rendered author identity attached to a destination post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAttachment {
    pub author_name: String,
    /// Avatar reference on the destination, when replication succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_icon: Option<String>,
    pub text: String,
    /// Provenance line referencing source server/channel/time.
    pub footer: String,
}

/// Narrow REST contract used by the core.
///
/// Implementations hold their own session credential; `login` establishes
/// it and `reauthenticate` replaces it after a 401/403.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Authenticate and return the session token.
    async fn login(&self) -> ApiResult<String>;

    /// Re-authenticate after a rejected credential. Returns the new token.
    async fn reauthenticate(&self) -> ApiResult<String>;

    /// Lightweight authenticated call used for periodic session checks.
    async fn validate_session(&self) -> ApiResult<()>;

    async fn fetch_channel(&self, channel_id: &ChannelId) -> ApiResult<Channel>;

    async fn fetch_user(&self, user_id: &UserId) -> ApiResult<User>;

    /// Returns None when the user has no avatar.
    async fn download_avatar(&self, user_id: &UserId) -> ApiResult<Option<Vec<u8>>>;

    /// Returns None when the server rejects the upload in a non-fatal way.
    async fn upload_avatar(
        &self,
        bytes: Vec<u8>,
        channel_id: &ChannelId,
    ) -> ApiResult<Option<String>>;

    /// Returns None when the file is gone on the source.
    async fn download_file(&self, file_id: &FileId) -> ApiResult<Option<FileDownload>>;

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        channel_id: &ChannelId,
    ) -> ApiResult<Option<FileId>>;

    async fn post_message(
        &self,
        channel_id: &ChannelId,
        body: &str,
        attachments: &[PostAttachment],
        file_ids: &[FileId],
    ) -> ApiResult<MessageId>;

    async fn update_message(
        &self,
        post_id: &MessageId,
        body: &str,
        attachments: &[PostAttachment],
    ) -> ApiResult<()>;

    async fn fetch_message(&self, post_id: &MessageId) -> ApiResult<Post>;

    /// Messages posted to `channel_id` strictly after `since`, oldest data
    /// the server has first; capped at `limit`.
    async fn fetch_messages_since(
        &self,
        channel_id: &ChannelId,
        since: TimestampMs,
        limit: u32,
    ) -> ApiResult<Vec<Post>>;
}

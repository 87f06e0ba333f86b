//! Author and channel identity cache.
//!
//! Fetching the author and replicating the avatar for every message would
//! hammer both endpoints; results are cached per user for the lifetime of
//! the pipeline. Avatar entries cache failures too, so a user with no
//! avatar (or a rejected upload) is not retried per message.

use std::collections::HashMap;

use crate::client::api::User;
use crate::common::types::{ChannelId, UserId};

/// Cached avatar replication result for one user.
#[derive(Debug, Clone, PartialEq)]
pub enum AvatarEntry {
    /// Replicated to the destination under this reference.
    Replicated(String),
    /// No avatar on the source, or replication failed; render without icon.
    Absent,
}

#[derive(Debug, Default)]
pub struct IdentityCache {
    users: HashMap<UserId, User>,
    avatars: HashMap<UserId, AvatarEntry>,
    channel_names: HashMap<ChannelId, String>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, user_id: &UserId) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn put_user(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn avatar(&self, user_id: &UserId) -> Option<&AvatarEntry> {
        self.avatars.get(user_id)
    }

    pub fn put_avatar(&mut self, user_id: UserId, entry: AvatarEntry) {
        self.avatars.insert(user_id, entry);
    }

    pub fn channel_name(&self, channel_id: &ChannelId) -> Option<&str> {
        self.channel_names.get(channel_id).map(String::as_str)
    }

    pub fn put_channel_name(&mut self, channel_id: ChannelId, name: String) {
        self.channel_names.insert(channel_id, name);
    }
}

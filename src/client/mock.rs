//! In-memory fakes of the client traits for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::api::{Channel, FileDownload, Post, PostAttachment, ServerApi, User};
use crate::client::transport::{EventStreamHandle, EventTransport, StreamFrame};
use crate::common::error::{ApiError, ApiResult, ConnectionError};
use crate::common::types::{ChannelId, FileId, MessageId, TimestampMs, UserId};

/// A `post_message` call captured by [`MockServerApi`].
#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub body: String,
    pub attachments: Vec<PostAttachment>,
    pub file_ids: Vec<FileId>,
}

/// An `update_message` call captured by [`MockServerApi`].
#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    pub post_id: MessageId,
    pub body: String,
    pub attachments: Vec<PostAttachment>,
}

/// Configurable in-memory [`ServerApi`].
#[derive(Default)]
pub struct MockServerApi {
    pub users: Mutex<HashMap<UserId, User>>,
    pub channels: Mutex<HashMap<ChannelId, Channel>>,
    pub avatars: Mutex<HashMap<UserId, Vec<u8>>>,
    pub files: Mutex<HashMap<FileId, FileDownload>>,
    pub history: Mutex<HashMap<ChannelId, Vec<Post>>>,
    /// Post types for `fetch_message`, keyed by destination post id.
    pub post_types: Mutex<HashMap<MessageId, String>>,

    pub posts: Mutex<Vec<RecordedPost>>,
    pub updates: Mutex<Vec<RecordedUpdate>>,

    pub fail_avatar_upload: AtomicBool,
    pub fail_file_upload: AtomicBool,
    pub fail_post: AtomicBool,
    pub reject_session: AtomicBool,

    pub login_calls: AtomicU64,
    pub reauth_calls: AtomicU64,
    post_seq: AtomicU64,
}

impl MockServerApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: &str, username: &str, display_name: &str, email: &str) {
        self.users.lock().unwrap().insert(
            id.to_string(),
            User {
                id: id.to_string(),
                username: username.to_string(),
                display_name: display_name.to_string(),
                email: email.to_string(),
            },
        );
    }

    pub fn add_channel(&self, id: &str, name: &str) {
        self.channels.lock().unwrap().insert(
            id.to_string(),
            Channel {
                id: id.to_string(),
                name: name.to_string(),
                channel_type: "O".to_string(),
            },
        );
    }

    pub fn recorded_posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().unwrap().clone()
    }

    pub fn recorded_updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerApi for MockServerApi {
    async fn login(&self) -> ApiResult<String> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Ok("mock-token".to_string())
    }

    async fn reauthenticate(&self) -> ApiResult<String> {
        self.reauth_calls.fetch_add(1, Ordering::SeqCst);
        self.reject_session.store(false, Ordering::SeqCst);
        Ok("mock-token-2".to_string())
    }

    async fn validate_session(&self) -> ApiResult<()> {
        if self.reject_session.load(Ordering::SeqCst) {
            Err(ApiError::Unauthorized {
                status: 401,
                message: "session expired".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn fetch_channel(&self, channel_id: &ChannelId) -> ApiResult<Channel> {
        self.channels
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                message: "channel not found".to_string(),
            })
    }

    async fn fetch_user(&self, user_id: &UserId) -> ApiResult<User> {
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                message: "user not found".to_string(),
            })
    }

    async fn download_avatar(&self, user_id: &UserId) -> ApiResult<Option<Vec<u8>>> {
        Ok(self.avatars.lock().unwrap().get(user_id).cloned())
    }

    async fn upload_avatar(
        &self,
        _bytes: Vec<u8>,
        _channel_id: &ChannelId,
    ) -> ApiResult<Option<String>> {
        if self.fail_avatar_upload.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let n = self.post_seq.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("avatar-ref-{}", n)))
    }

    async fn download_file(&self, file_id: &FileId) -> ApiResult<Option<FileDownload>> {
        Ok(self.files.lock().unwrap().get(file_id).cloned())
    }

    async fn upload_file(
        &self,
        _bytes: Vec<u8>,
        filename: &str,
        _channel_id: &ChannelId,
    ) -> ApiResult<Option<FileId>> {
        if self.fail_file_upload.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(format!("uploaded-{}", filename)))
    }

    async fn post_message(
        &self,
        channel_id: &ChannelId,
        body: &str,
        attachments: &[PostAttachment],
        file_ids: &[FileId],
    ) -> ApiResult<MessageId> {
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                message: "post rejected".to_string(),
            });
        }
        let id = format!("dest-{}", self.post_seq.fetch_add(1, Ordering::SeqCst));
        self.posts.lock().unwrap().push(RecordedPost {
            id: id.clone(),
            channel_id: channel_id.clone(),
            body: body.to_string(),
            attachments: attachments.to_vec(),
            file_ids: file_ids.to_vec(),
        });
        Ok(id)
    }

    async fn update_message(
        &self,
        post_id: &MessageId,
        body: &str,
        attachments: &[PostAttachment],
    ) -> ApiResult<()> {
        self.updates.lock().unwrap().push(RecordedUpdate {
            post_id: post_id.clone(),
            body: body.to_string(),
            attachments: attachments.to_vec(),
        });
        Ok(())
    }

    async fn fetch_message(&self, post_id: &MessageId) -> ApiResult<Post> {
        let post_type = self
            .post_types
            .lock()
            .unwrap()
            .get(post_id)
            .cloned()
            .unwrap_or_default();
        let recorded = self
            .posts
            .lock()
            .unwrap()
            .iter()
            .find(|p| &p.id == post_id)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                message: "post not found".to_string(),
            })?;
        Ok(Post {
            id: recorded.id,
            channel_id: recorded.channel_id,
            user_id: "relay".to_string(),
            message: recorded.body,
            create_at: 0,
            edit_at: 0,
            file_ids: recorded.file_ids,
            post_type,
        })
    }

    async fn fetch_messages_since(
        &self,
        channel_id: &ChannelId,
        since: TimestampMs,
        limit: u32,
    ) -> ApiResult<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .history
            .lock()
            .unwrap()
            .get(channel_id)
            .map(|posts| {
                posts
                    .iter()
                    .filter(|p| p.create_at > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        posts.sort_by_key(|p| p.create_at);
        posts.truncate(limit as usize);
        Ok(posts)
    }
}

/// Scripted transport: each `open` call pops the next prepared handle.
pub struct MockTransport {
    handles: Mutex<VecDeque<MockStreamHandle>>,
    pub open_calls: AtomicU64,
}

impl MockTransport {
    pub fn new(handles: Vec<MockStreamHandle>) -> Self {
        Self {
            handles: Mutex::new(handles.into()),
            open_calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn open(&self, _token: &str) -> Result<Box<dyn EventStreamHandle>, ConnectionError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let handle = self.handles.lock().unwrap().pop_front();
        match handle {
            Some(handle) => Ok(Box::new(handle)),
            None => Err(ConnectionError::ConnectFailed {
                url: "mock".to_string(),
                message: "no more scripted connections".to_string(),
            }),
        }
    }
}

/// One scripted event-stream connection fed through an mpsc channel.
pub struct MockStreamHandle {
    frames: mpsc::UnboundedReceiver<Result<StreamFrame, ConnectionError>>,
    pub sent: Arc<Mutex<Vec<(String, Value)>>>,
    pub pings: Arc<AtomicU64>,
}

impl MockStreamHandle {
    pub fn new() -> (
        Self,
        mpsc::UnboundedSender<Result<StreamFrame, ConnectionError>>,
        Arc<Mutex<Vec<(String, Value)>>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                frames: rx,
                sent: sent.clone(),
                pings: Arc::new(AtomicU64::new(0)),
            },
            tx,
            sent,
        )
    }
}

#[async_trait]
impl EventStreamHandle for MockStreamHandle {
    async fn next_frame(&mut self) -> Option<Result<StreamFrame, ConnectionError>> {
        self.frames.recv().await
    }

    async fn send(&mut self, action: &str, payload: Value) -> Result<(), ConnectionError> {
        self.sent
            .lock()
            .unwrap()
            .push((action.to_string(), payload));
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.frames.close();
        Ok(())
    }
}

//! `reqwest` implementation of the [`ServerApi`] contract.
//!
//! All calls use a fixed 10s request timeout and are never retried here;
//! degradation and reconnect decisions belong to the callers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::api::{Channel, FileDownload, Post, PostAttachment, ServerApi, User};
use crate::common::error::{ApiError, ApiResult};
use crate::common::types::{ChannelId, FileId, MessageId, TimestampMs, UserId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for one endpoint. Holds the current session token.
pub struct HttpServerApi {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl HttpServerApi {
    pub fn new(base_url: &str, username: &str, password: &str) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            client,
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    async fn bearer(&self) -> String {
        self.token.read().await.clone().unwrap_or_default()
    }

    async fn get(&self, path: &str) -> ApiResult<Response> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(self.bearer().await)
            .send()
            .await?;
        check_status(response).await
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> ApiResult<Response> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(self.bearer().await)
            .json(&body)
            .send()
            .await?;
        check_status(response).await
    }

    async fn put_json(&self, path: &str, body: serde_json::Value) -> ApiResult<Response> {
        let response = self
            .client
            .put(self.url(path))
            .bearer_auth(self.bearer().await)
            .json(&body)
            .send()
            .await?;
        check_status(response).await
    }

    async fn upload_bytes(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        channel_id: &ChannelId,
    ) -> ApiResult<Option<FileId>> {
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("files", part);

        let response = self
            .client
            .post(self.url(&format!("/files?channel_id={}", channel_id)))
            .bearer_auth(self.bearer().await)
            .multipart(form)
            .send()
            .await?;

        // Size/type rejections are non-fatal for the caller.
        if response.status().is_client_error()
            && response.status() != StatusCode::UNAUTHORIZED
            && response.status() != StatusCode::FORBIDDEN
        {
            debug!(status = %response.status(), filename, "file upload rejected");
            return Ok(None);
        }

        let response = check_status(response).await?;
        let uploaded: FileUploadResponse = decode(response).await?;
        Ok(uploaded.file_infos.into_iter().next().map(|f| f.id))
    }
}

#[async_trait]
impl ServerApi for HttpServerApi {
    async fn login(&self) -> ApiResult<String> {
        let response = self
            .client
            .post(self.url("/users/login"))
            .json(&json!({ "login_id": self.username, "password": self.password }))
            .send()
            .await?;
        let response = check_status(response).await?;

        let token = response
            .headers()
            .get("Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Decode {
                message: "login response missing Token header".to_string(),
            })?;

        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn reauthenticate(&self) -> ApiResult<String> {
        self.token.write().await.take();
        self.login().await
    }

    async fn validate_session(&self) -> ApiResult<()> {
        self.get("/users/me").await.map(|_| ())
    }

    async fn fetch_channel(&self, channel_id: &ChannelId) -> ApiResult<Channel> {
        decode(self.get(&format!("/channels/{}", channel_id)).await?).await
    }

    async fn fetch_user(&self, user_id: &UserId) -> ApiResult<User> {
        decode(self.get(&format!("/users/{}", user_id)).await?).await
    }

    async fn download_avatar(&self, user_id: &UserId) -> ApiResult<Option<Vec<u8>>> {
        match self.get(&format!("/users/{}/image", user_id)).await {
            Ok(response) => Ok(Some(response.bytes().await?.to_vec())),
            Err(ApiError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upload_avatar(
        &self,
        bytes: Vec<u8>,
        channel_id: &ChannelId,
    ) -> ApiResult<Option<String>> {
        self.upload_bytes(bytes, "avatar.png", channel_id).await
    }

    async fn download_file(&self, file_id: &FileId) -> ApiResult<Option<FileDownload>> {
        let info: FileInfo = match self.get(&format!("/files/{}/info", file_id)).await {
            Ok(response) => decode(response).await?,
            Err(ApiError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        match self.get(&format!("/files/{}", file_id)).await {
            Ok(response) => Ok(Some(FileDownload {
                bytes: response.bytes().await?.to_vec(),
                filename: info.name,
            })),
            Err(ApiError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        channel_id: &ChannelId,
    ) -> ApiResult<Option<FileId>> {
        self.upload_bytes(bytes, filename, channel_id).await
    }

    async fn post_message(
        &self,
        channel_id: &ChannelId,
        body: &str,
        attachments: &[PostAttachment],
        file_ids: &[FileId],
    ) -> ApiResult<MessageId> {
        let response = self
            .post_json(
                "/posts",
                json!({
                    "channel_id": channel_id,
                    "message": body,
                    "file_ids": file_ids,
                    "props": { "attachments": attachments },
                }),
            )
            .await?;
        let post: Post = decode(response).await?;
        Ok(post.id)
    }

    async fn update_message(
        &self,
        post_id: &MessageId,
        body: &str,
        attachments: &[PostAttachment],
    ) -> ApiResult<()> {
        self.put_json(
            &format!("/posts/{}/patch", post_id),
            json!({
                "message": body,
                "props": { "attachments": attachments },
            }),
        )
        .await
        .map(|_| ())
    }

    async fn fetch_message(&self, post_id: &MessageId) -> ApiResult<Post> {
        decode(self.get(&format!("/posts/{}", post_id)).await?).await
    }

    async fn fetch_messages_since(
        &self,
        channel_id: &ChannelId,
        since: TimestampMs,
        limit: u32,
    ) -> ApiResult<Vec<Post>> {
        let response = self
            .get(&format!("/channels/{}/posts?since={}", channel_id, since))
            .await?;
        let list: PostList = decode(response).await?;

        let mut posts: Vec<Post> = list.posts.into_values().collect();
        posts.sort_by_key(|p| p.create_at);
        posts.truncate(limit as usize);
        Ok(posts)
    }
}

async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(ApiError::Unauthorized {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> ApiResult<T> {
    response.json().await.map_err(|e| ApiError::Decode {
        message: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[allow(dead_code)]
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FileUploadResponse {
    file_infos: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct PostList {
    #[allow(dead_code)]
    #[serde(default)]
    order: Vec<String>,
    posts: HashMap<String, Post>,
}

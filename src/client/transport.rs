//! Event-stream transport contract and the frame decode boundary.
//!
//! Raw stream payloads are duck-typed JSON; they are decoded into
//! [`StreamFrame`] here so nothing past this boundary inspects a loose
//! payload.

use async_trait::async_trait;
use serde_json::Value;

use crate::common::error::ConnectionError;
use crate::common::types::{MessageEvent, NormalizedMessageEvent};

/// A decoded frame from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// Server greeting after a successful handshake.
    Hello,
    /// A message was posted or edited.
    Event(MessageEvent),
    /// Transport- or application-level liveness response.
    Pong,
    /// Any other event type; carried for logging only.
    Other(String),
}

/// Opens authenticated event-stream connections.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn open(&self, token: &str) -> Result<Box<dyn EventStreamHandle>, ConnectionError>;
}

/// One live event-stream connection.
#[async_trait]
pub trait EventStreamHandle: Send {
    /// Next decoded frame; None when the connection is closed.
    async fn next_frame(&mut self) -> Option<Result<StreamFrame, ConnectionError>>;

    /// Send an application-level action over the stream.
    async fn send(&mut self, action: &str, payload: Value) -> Result<(), ConnectionError>;

    /// Send a transport-level ping.
    async fn ping(&mut self) -> Result<(), ConnectionError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Decode a raw text frame into a [`StreamFrame`].
///
/// Unknown event types are preserved as `Other` rather than rejected, so a
/// server-side addition never breaks the stream.
pub fn decode_frame(text: &str) -> Result<StreamFrame, ConnectionError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ConnectionError::Transport(format!("invalid frame: {}", e)))?;

    let event = match value.get("event").and_then(Value::as_str) {
        Some(event) => event.to_string(),
        // Action acknowledgements ({"status":"OK","seq_reply":..}) double
        // as liveness responses for the application-level probe.
        None if value.get("seq_reply").is_some() => return Ok(StreamFrame::Pong),
        None => {
            return Err(ConnectionError::Transport(
                "frame missing event field".to_string(),
            ))
        }
    };

    match event.as_str() {
        "hello" => Ok(StreamFrame::Hello),
        "pong" => Ok(StreamFrame::Pong),
        "posted" => decode_post_event(&value, false),
        "post_edited" => decode_post_event(&value, true),
        other => Ok(StreamFrame::Other(other.to_string())),
    }
}

fn decode_post_event(value: &Value, edited: bool) -> Result<StreamFrame, ConnectionError> {
    let data = value
        .get("data")
        .ok_or_else(|| ConnectionError::Transport("event missing data".to_string()))?;

    // The post payload arrives as a JSON-encoded string inside the frame.
    let post: Value = match data.get("post") {
        Some(Value::String(inner)) => serde_json::from_str(inner)
            .map_err(|e| ConnectionError::Transport(format!("invalid post payload: {}", e)))?,
        Some(obj @ Value::Object(_)) => obj.clone(),
        _ => {
            return Err(ConnectionError::Transport(
                "event missing post payload".to_string(),
            ))
        }
    };

    let str_field = |v: &Value, key: &str| -> String {
        v.get(key).and_then(Value::as_str).unwrap_or("").to_string()
    };

    let id = str_field(&post, "id");
    let channel_id = str_field(&post, "channel_id");
    if id.is_empty() || channel_id.is_empty() {
        return Err(ConnectionError::Transport(
            "post payload missing id or channel_id".to_string(),
        ));
    }

    let edit_at = post.get("edit_at").and_then(Value::as_i64).unwrap_or(0);
    let attachment_ids = post
        .get("file_ids")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let normalized = NormalizedMessageEvent {
        id,
        channel_id,
        author_id: str_field(&post, "user_id"),
        author_username: str_field(data, "sender_name"),
        author_display_name: str_field(data, "sender_display_name"),
        body: str_field(&post, "message"),
        created_at: post.get("create_at").and_then(Value::as_i64).unwrap_or(0),
        edited_at: if edit_at > 0 { Some(edit_at) } else { None },
        attachment_ids,
    };

    Ok(StreamFrame::Event(if edited {
        MessageEvent::Edited(normalized)
    } else {
        MessageEvent::Posted(normalized)
    }))
}

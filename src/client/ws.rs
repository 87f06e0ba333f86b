//! `tokio-tungstenite` implementation of the event-stream transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::client::transport::{decode_frame, EventStreamHandle, EventTransport, StreamFrame};
use crate::common::error::ConnectionError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects WebSocket event streams to one endpoint.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn open(&self, _token: &str) -> Result<Box<dyn EventStreamHandle>, ConnectionError> {
        let connect = connect_async(&self.url);
        let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout)?
            .map_err(|e| ConnectionError::ConnectFailed {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let (sink, source) = stream.split();
        Ok(Box::new(WsStreamHandle {
            sink,
            source,
            seq: AtomicU64::new(1),
        }))
    }
}

struct WsStreamHandle {
    sink: SplitSink<WsStream, Message>,
    source: SplitStream<WsStream>,
    seq: AtomicU64,
}

#[async_trait]
impl EventStreamHandle for WsStreamHandle {
    async fn next_frame(&mut self) -> Option<Result<StreamFrame, ConnectionError>> {
        loop {
            let message = match self.source.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(ConnectionError::Transport(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(decode_frame(&text)),
                Message::Pong(_) => return Some(Ok(StreamFrame::Pong)),
                Message::Ping(payload) => {
                    if let Err(e) = self.sink.send(Message::Pong(payload)).await {
                        return Some(Err(ConnectionError::Transport(e.to_string())));
                    }
                }
                Message::Close(_) => return None,
                other => {
                    debug!(?other, "ignoring non-text frame");
                }
            }
        }
    }

    async fn send(&mut self, action: &str, payload: Value) -> Result<(), ConnectionError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let frame = json!({ "action": action, "seq": seq, "data": payload });
        self.sink
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }
}

//! Error types for the application.

use thiserror::Error;

/// Top-level application error.
#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// REST API errors against either endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401/403 - session credential rejected. Triggers re-authentication.
    #[error("Unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to decode response: {message}")]
    Decode { message: String },
}

impl ApiError {
    /// Whether this error indicates a rejected session credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

/// Event-stream connection errors. Always recoverable via reconnect.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {url}: {message}")]
    ConnectFailed { url: String, message: String },

    #[error("Connection handshake timed out")]
    HandshakeTimeout,

    #[error("Connection closed by remote")]
    Closed,

    #[error("No pong received within {timeout_secs}s")]
    StalePong { timeout_secs: u64 },

    #[error("No message received within {timeout_secs}s")]
    StaleStream { timeout_secs: u64 },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors inside a single message's forward/edit path.
///
/// These are caught at the message boundary and logged with the source
/// message id for correlation; they never unwind into the supervisor loop.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to post to destination channel {channel_id}: {source}")]
    PostFailed {
        channel_id: String,
        #[source]
        source: ApiError,
    },

    #[error("Failed to update destination post {post_id}: {source}")]
    UpdateFailed {
        post_id: String,
        #[source]
        source: ApiError,
    },

    #[error("Failed to resolve author {user_id}: {source}")]
    AuthorLookupFailed {
        user_id: String,
        #[source]
        source: ApiError,
    },
}

/// Result type alias for API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Result type alias for connection operations.
#[allow(dead_code)]
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

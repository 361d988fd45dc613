use std::time::Duration;
use thiserror::Error;

/// All errors generated in `barter-volatility-alert`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlertError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("StreamError: {0}")]
    Stream(#[from] StreamError),

    #[error("NotifyError: {0}")]
    Notify(#[from] NotifyError),

    #[error("FeedError: {0}")]
    Feed(#[from] FeedError),

    #[error("shutdown signal listener failed: {0}")]
    Signal(String),
}

/// Startup misconfiguration. Always fatal, surfaced before any connection attempt.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Transport level failures of the ticker stream.
///
/// These never escape the [`StreamClient`](crate::stream::StreamClient), which recovers from
/// all of them by scheduling a reconnect.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StreamError {
    #[error("invalid stream url {url}: {reason}")]
    Url { url: String, reason: String },

    #[error("proxy tunnel failed: {0}")]
    Proxy(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    Socket(String),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

/// Failure to deliver an alert. Logged by the dispatcher and otherwise ignored.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum NotifyError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("alert rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for NotifyError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

/// Feed payload that could not be decoded into a ticker batch.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FeedError {
    #[error("malformed ticker payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for FeedError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

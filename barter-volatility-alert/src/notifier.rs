//! Outbound alert delivery.
//!
//! Delivery is best-effort: [`dispatch`] detaches the send onto its own task so a slow or
//! failing sink never blocks ingestion.

use crate::error::NotifyError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Receives formatted alert text and forwards it to a notification channel.
#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Send `message` on a detached task, logging (and otherwise swallowing) any failure.
pub fn dispatch(sink: Arc<dyn AlertSink>, message: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        match sink.send(&message).await {
            Ok(()) => debug!("alert delivered"),
            Err(error) => error!(%error, "failed to deliver alert"),
        }
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelegramConfig {
    /// Bot API token.
    pub token: String,
    pub chat_id: String,
    /// Optional forward proxy for the Bot API requests.
    pub proxy_url: Option<String>,
}

/// [`AlertSink`] posting to the Telegram Bot API `sendMessage` method.
///
/// See docs: <https://core.telegram.org/bots/api#sendmessage>
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

impl TelegramNotifier {
    const API_BASE: &'static str = "https://api.telegram.org";

    pub fn new(config: &TelegramConfig) -> Result<Self, NotifyError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy_url) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }

        Ok(Self {
            http: builder.build()?,
            endpoint: format!("{}/bot{}/sendMessage", Self::API_BASE, config.token),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl AlertSink for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: message,
                parse_mode: "Markdown",
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, message: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        async fn send(&self, _: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Http("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_delivers_message() {
        let sink = Arc::new(RecordingSink::default());
        dispatch(sink.clone(), "hello".to_string()).await.unwrap();
        assert_eq!(*sink.sent.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failure() {
        let handle = dispatch(Arc::new(FailingSink), "hello".to_string());
        assert!(handle.await.is_ok());
    }

    #[test]
    fn test_telegram_notifier_endpoint() {
        let notifier = TelegramNotifier::new(&TelegramConfig {
            token: "123:abc".to_string(),
            chat_id: "-100".to_string(),
            proxy_url: Some("http://127.0.0.1:7890".to_string()),
        })
        .unwrap();

        assert_eq!(notifier.endpoint, "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(notifier.chat_id, "-100");
    }

    #[test]
    fn test_send_message_body() {
        let body = serde_json::to_value(SendMessage {
            chat_id: "42",
            text: "alert",
            parse_mode: "Markdown",
        })
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({"chat_id": "42", "text": "alert", "parse_mode": "Markdown"})
        );
    }
}

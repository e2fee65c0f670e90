//! Thin client for the Telegram Bot API.
//!
//! The coordinator depends on the [`TelegramApi`] capability, not on HTTP:
//! tests substitute scripted implementations. The real client does no
//! retrying of its own; transient failures surface as
//! [`RelayError::Transient`] and the caller's wait loop decides.

use async_trait::async_trait;
use ch_core::{RelayError, Result};
use serde::Deserialize;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(45);
const ERROR_BODY_EXCERPT: usize = 2048;
const MIN_POLL_TIMEOUT_SECS: u64 = 1;
const MAX_POLL_TIMEOUT_SECS: u64 = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookInfo {
    #[serde(default)]
    pub url: String,
}

/// The narrow upstream capability the coordinator needs.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Sends plain text to a chat and returns the new message's id.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64>;

    /// Long-polls for updates at `offset`. `timeout_seconds` is clamped to
    /// the Bot API's accepted 1..=50 range.
    async fn get_updates(&self, offset: i64, timeout_seconds: u64) -> Result<Vec<Update>>;

    async fn get_webhook_info(&self) -> Result<WebhookInfo>;
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    ok: bool,
    result: Option<T>,
}

pub struct HttpTelegramApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTelegramApi {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        payload: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::Transient(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
            return Err(RelayError::Provider {
                method,
                status: status.as_u16(),
                body: excerpt.trim().to_string(),
            });
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| RelayError::Transient(format!("{method} decode: {e}")))?;
        if !envelope.ok {
            return Err(RelayError::Provider {
                method,
                status: status.as_u16(),
                body: "ok=false".to_string(),
            });
        }
        envelope.result.ok_or(RelayError::Provider {
            method,
            status: status.as_u16(),
            body: "missing result".to_string(),
        })
    }
}

#[async_trait]
impl TelegramApi for HttpTelegramApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64> {
        let message: Message = self
            .call(
                "sendMessage",
                serde_json::json!({ "chat_id": chat_id, "text": text }),
            )
            .await?;
        Ok(message.message_id)
    }

    async fn get_updates(&self, offset: i64, timeout_seconds: u64) -> Result<Vec<Update>> {
        let timeout = timeout_seconds.clamp(MIN_POLL_TIMEOUT_SECS, MAX_POLL_TIMEOUT_SECS);
        let mut payload = serde_json::json!({
            "timeout": timeout,
            "allowed_updates": ["message"],
        });
        if offset > 0 {
            payload["offset"] = serde_json::json!(offset);
        }
        self.call("getUpdates", payload).await
    }

    async fn get_webhook_info(&self) -> Result<WebhookInfo> {
        self.call("getWebhookInfo", serde_json::json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, Update};

    #[test]
    fn update_decodes_with_threaded_reply() {
        let raw = r#"{
            "update_id": 7,
            "message": {
                "message_id": 42,
                "date": 1700000000,
                "text": "ship it",
                "chat": {"id": 4242},
                "from": {"username": "sam"},
                "reply_to_message": {"message_id": 40, "chat": {"id": 4242}}
            }
        }"#;
        let update: Update = serde_json::from_str(raw).expect("decode");
        let message = update.message.expect("message");
        assert_eq!(message.message_id, 42);
        assert_eq!(message.chat.id, 4242);
        assert_eq!(message.reply_to_message.expect("reply").message_id, 40);
    }

    #[test]
    fn update_without_message_decodes() {
        let update: Update = serde_json::from_str(r#"{"update_id": 9}"#).expect("decode");
        assert!(update.message.is_none());
    }

    #[test]
    fn partial_message_defaults_are_harmless() {
        let message: Message =
            serde_json::from_str(r#"{"chat": {"id": 1}}"#).expect("decode");
        assert_eq!(message.message_id, 0);
        assert_eq!(message.chat.id, 1);
        assert!(message.text.is_none());
        assert!(message.from.is_none());
    }
}

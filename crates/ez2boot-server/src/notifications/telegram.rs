//! Telegram Bot API sender.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{NotificationError, Sender, parse_config, require};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by `@BotFather`.
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Serialize)]
pub struct TelegramMessage<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
}

pub struct TelegramSender {
    http: reqwest::Client,
    api_base: String,
}

impl TelegramSender {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_api_base(http, TELEGRAM_API_BASE)
    }

    /// Point the sender at a different Bot API host.
    pub fn with_api_base(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }

    fn send_message_url(&self, token: &str) -> String {
        format!("{}/bot{token}/sendMessage", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Sender for TelegramSender {
    fn channel_type(&self) -> &'static str {
        "telegram"
    }

    fn label(&self) -> &'static str {
        "Telegram"
    }

    fn validate(&self, config: &str) -> Result<(), NotificationError> {
        let cfg: TelegramConfig = parse_config(config)?;
        require("token", &cfg.token)?;
        require("chat_id", &cfg.chat_id)
    }

    async fn send(
        &self,
        message: &str,
        _title: &str,
        config: &str,
    ) -> Result<(), NotificationError> {
        let cfg: TelegramConfig = parse_config(config)?;
        let payload = TelegramMessage {
            chat_id: &cfg.chat_id,
            text: message,
        };

        let response = self
            .http
            .post(self.send_message_url(&cfg.token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("Telegram message sent");
            Ok(())
        } else {
            let status_code = status.as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status_code, body = %body, "Telegram API returned error");
            Err(NotificationError::ApiError {
                status: status_code,
                body,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::notifications::registry::test_http_client;

    #[test]
    fn send_message_url_embeds_token() {
        let sender = TelegramSender::with_api_base(test_http_client(), "https://tg.local/");
        assert_eq!(
            sender.send_message_url("123:abc"),
            "https://tg.local/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn message_serializes_to_json() {
        let msg = TelegramMessage {
            chat_id: "42",
            text: "hello",
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["chat_id"], "42");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn validate_requires_token_and_chat() {
        let sender = TelegramSender::new(test_http_client());
        assert!(sender.validate(r#"{"token":"t","chat_id":"1"}"#).is_ok());
        assert!(sender.validate(r#"{"token":"","chat_id":"1"}"#).is_err());
        assert!(sender.validate(r#"{"token":"t"}"#).is_err());
        assert!(sender.validate("not json").is_err());
    }

    #[tokio::test]
    async fn unreachable_api_is_request_error() {
        let sender = TelegramSender::with_api_base(test_http_client(), "http://127.0.0.1:9");
        let result = sender
            .send("hi", "title", r#"{"token":"t","chat_id":"1"}"#)
            .await;
        assert!(matches!(result, Err(NotificationError::Request(_))));
    }
}

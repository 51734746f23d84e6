//! Microsoft Teams incoming-webhook sender.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{NotificationError, Sender, parse_config, require};

#[derive(Debug, Clone, Deserialize)]
pub struct TeamsConfig {
    pub webhook: String,
}

pub struct TeamsSender {
    http: reqwest::Client,
}

impl TeamsSender {
    pub const fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Adaptive Card with the title in bold above the message.
    pub fn build_card(title: &str, message: &str) -> Value {
        json!({
            "type": "AdaptiveCard",
            "version": "1.4",
            "body": [
                { "type": "TextBlock", "text": title, "weight": "Bolder", "wrap": true },
                { "type": "TextBlock", "text": message, "wrap": true }
            ]
        })
    }
}

#[async_trait]
impl Sender for TeamsSender {
    fn channel_type(&self) -> &'static str {
        "teams"
    }

    fn label(&self) -> &'static str {
        "Teams"
    }

    fn validate(&self, config: &str) -> Result<(), NotificationError> {
        let cfg: TeamsConfig = parse_config(config)?;
        require("webhook", &cfg.webhook)?;
        reqwest::Url::parse(&cfg.webhook)
            .map_err(|e| NotificationError::InvalidConfig(format!("webhook: {e}")))?;
        Ok(())
    }

    async fn send(
        &self,
        message: &str,
        title: &str,
        config: &str,
    ) -> Result<(), NotificationError> {
        let cfg: TeamsConfig = parse_config(config)?;

        let response = self
            .http
            .post(&cfg.webhook)
            .json(&Self::build_card(title, message))
            .send()
            .await
            .map_err(|e| NotificationError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("Teams card posted");
            Ok(())
        } else {
            let status_code = status.as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status_code, body = %body, "Teams webhook returned error");
            Err(NotificationError::ApiError {
                status: status_code,
                body,
            })
        }
    }
}

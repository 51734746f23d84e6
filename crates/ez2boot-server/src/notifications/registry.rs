//! Channel-type to sender lookup, built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{EmailSender, NotificationError, Sender, TeamsSender, TelegramSender};

#[derive(Default, Clone)]
pub struct SenderRegistry {
    senders: BTreeMap<&'static str, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the email, Telegram and Teams senders.
    pub fn with_builtin(http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmailSender::new()));
        registry.register(Arc::new(TelegramSender::new(http.clone())));
        registry.register(Arc::new(TeamsSender::new(http)));
        registry
    }

    /// Add a sender, replacing any previous one for the same channel type.
    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.channel_type(), sender);
    }

    pub fn get(&self, channel_type: &str) -> Option<Arc<dyn Sender>> {
        self.senders.get(channel_type).cloned()
    }

    /// `(type, label)` pairs for every registered channel.
    pub fn channels(&self) -> Vec<(&'static str, &'static str)> {
        self.senders
            .values()
            .map(|s| (s.channel_type(), s.label()))
            .collect()
    }

    pub fn validate(&self, channel_type: &str, config: &str) -> Result<(), NotificationError> {
        self.senders
            .get(channel_type)
            .ok_or_else(|| NotificationError::UnsupportedType(channel_type.to_string()))?
            .validate(config)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn test_http_client() -> reqwest::Client {
    let _ = rustls::crypto::ring::default_provider().install_default();
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
        .expect("failed to build test HTTP client")
}

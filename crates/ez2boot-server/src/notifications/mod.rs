//! Notification delivery.
//!
//! Lifecycle steps queue notifications in the catalog; the [`Dispatcher`]
//! drains the queue through the [`Sender`] registered for each recipient's
//! channel type. Built-in channels:
//! - [`EmailSender`] over SMTP
//! - [`TelegramSender`] via the Bot API
//! - [`TeamsSender`] via an incoming webhook

pub mod dispatcher;
pub mod email;
pub mod registry;
pub mod teams;
pub mod telegram;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::storage::CatalogDatabase;

pub use dispatcher::{DispatchReport, Dispatcher, NotifyTask};
pub use email::EmailSender;
pub use registry::SenderRegistry;
pub use teams::TeamsSender;
pub use telegram::TelegramSender;

/// Errors that can occur in the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Channel config JSON is malformed or missing a field.
    #[error("Invalid channel config: {0}")]
    InvalidConfig(String),

    /// HTTP request to the channel API failed.
    #[error("Request error: {0}")]
    Request(String),

    /// Channel API returned a non-success status code.
    #[error("API error (status {status}): {body}")]
    ApiError {
        /// HTTP status code returned by the API.
        status: u16,
        /// Response body from the API.
        body: String,
    },

    /// SMTP delivery failed.
    #[error("SMTP error: {0}")]
    Smtp(String),

    /// No sender is registered for the channel type.
    #[error("Unsupported channel type: {0}")]
    UnsupportedType(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<ez2boot_core::db::DatabaseError> for NotificationError {
    fn from(e: ez2boot_core::db::DatabaseError) -> Self {
        Self::Database(e.to_string())
    }
}

/// A delivery channel.
///
/// `config` is the channel-specific JSON stored in the recipient's setting.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Key stored in `user_notifications.type`.
    fn channel_type(&self) -> &'static str;

    /// Human-readable channel name.
    fn label(&self) -> &'static str;

    /// Check a config before it is stored.
    fn validate(&self, config: &str) -> Result<(), NotificationError>;

    async fn send(
        &self,
        message: &str,
        title: &str,
        config: &str,
    ) -> Result<(), NotificationError>;
}

/// Parse a channel config into its typed form.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &str) -> Result<T, NotificationError> {
    serde_json::from_str(config).map_err(|e| NotificationError::InvalidConfig(e.to_string()))
}

/// Fail with `InvalidConfig` when a required field is blank.
pub(crate) fn require(field: &str, value: &str) -> Result<(), NotificationError> {
    if value.trim().is_empty() {
        return Err(NotificationError::InvalidConfig(format!("{field} is missing")));
    }
    Ok(())
}

/// Validate a channel config against its sender and store it for `user_id`.
pub async fn set_user_channel(
    db: &CatalogDatabase,
    registry: &SenderRegistry,
    user_id: &str,
    channel_type: &str,
    config: &str,
) -> Result<(), NotificationError> {
    registry.validate(channel_type, config)?;
    db.set_user_notification(user_id, channel_type, config).await?;
    Ok(())
}

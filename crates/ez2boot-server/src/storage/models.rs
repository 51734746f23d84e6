//! Data models for the ez2boot catalog.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Generic power state of a provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    On,
    Off,
    Transitioning,
}

impl ServerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Transitioning => "transitioning",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "transitioning" => Ok(Self::Transitioning),
            other => Err(format!("unknown server state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Server {
    pub unique_id: String,
    pub name: String,
    pub server_group: String,
    pub state: String,
    pub next_state: Option<String>,
    pub time_added: i64,
    pub time_last_on: Option<i64>,
    pub time_last_off: Option<i64>,
    pub last_user: Option<String>,
}

/// A lease row. `token` holds the SHA-256 digest of the caller's token and is
/// `None` once the session has been terminated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServerSession {
    pub id: i64,
    pub token: Option<String>,
    pub user_id: String,
    pub email: String,
    pub server_group: String,
    pub expiry: i64,
    pub to_cleanup: i64,
    pub to_notify: i64,
    pub warning_notified: i64,
    pub on_notified: i64,
    pub off_notified: i64,
}

impl ServerSession {
    pub const fn is_terminated(&self) -> bool {
        self.to_cleanup != 0
    }
}

/// Session row as exposed to callers, without the token digest.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub email: String,
    pub server_group: String,
    pub expiry: i64,
    pub to_cleanup: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationQueueEntry {
    pub id: i64,
    pub user_id: String,
    pub message: String,
    pub title: String,
    pub time_added: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserNotificationSetting {
    pub user_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub channel_type: String,
    pub config: String,
}

/// A queued notification joined with its recipient's channel setting.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingNotification {
    pub id: i64,
    pub user_id: String,
    pub message: String,
    pub title: String,
    pub channel_type: String,
    pub config: String,
}

/// Outcome of reconciling one scrape into the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogSyncReport {
    /// Rows inserted or updated.
    pub changed: u64,
    /// Rows deleted because the provider no longer reports them.
    pub removed: u64,
}

impl CatalogSyncReport {
    pub const fn is_noop(&self) -> bool {
        self.changed == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServerSummary {
    pub name: String,
    pub state: String,
    pub next_state: Option<String>,
}

/// Servers of one group together with the current lease holder, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub server_group: String,
    pub servers: Vec<ServerSummary>,
    pub current_user: Option<String>,
    pub expiry: Option<i64>,
}

//! SQLite catalog store for ez2boot.
//!
//! Persists servers, leases, the notification queue and per-user channel
//! settings. Every coordination point between workers is a transaction here.

mod db;
mod models;
mod queries_notifications;
mod queries_servers;
mod queries_sessions;


pub use db::{CatalogDatabase, DatabaseError};
pub use models::*;
pub use queries_notifications::enqueue_notification;
pub use queries_sessions::{NewSessionParams, QueuedMessage};

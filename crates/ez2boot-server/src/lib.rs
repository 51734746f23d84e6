//! ez2boot Server Library
//!
//! Timed leases on groups of cloud instances:
//! - SQLite catalog of servers, sessions and queued notifications
//! - Provider adapters (AWS, Azure, in-memory)
//! - Catalog reconciler (scrape + start/stop)
//! - Session service and lifecycle worker
//! - Notification dispatcher with email, Telegram and Teams senders
//! - Worker scheduler

pub mod notifications;
pub mod provider;
pub mod reconciler;
pub mod scheduler;
pub mod session;
pub mod storage;

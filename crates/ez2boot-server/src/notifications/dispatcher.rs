//! Notification queue dispatcher.
//!
//! Each tick purges entries that can never be routed, then delivers the rest
//! one at a time. Delivered entries are deleted; failed ones stay queued and
//! are retried on the next tick with no attempt limit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{NotificationError, SenderRegistry};
use crate::scheduler::PeriodicTask;
use crate::storage::CatalogDatabase;

/// Outcome of one dispatcher tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Delivered and removed from the queue.
    pub sent: usize,
    /// Delivery failed; left queued.
    pub failed: usize,
    /// Removed because no sender handles the recipient's channel type.
    pub dropped: usize,
    /// Removed because the recipient has no channel setting.
    pub orphaned: u64,
}

pub struct Dispatcher {
    db: CatalogDatabase,
    registry: Arc<SenderRegistry>,
}

impl Dispatcher {
    pub const fn new(db: CatalogDatabase, registry: Arc<SenderRegistry>) -> Self {
        Self { db, registry }
    }

    pub async fn dispatch(&self) -> Result<DispatchReport, NotificationError> {
        let mut report = DispatchReport {
            orphaned: self.db.purge_orphaned_notifications().await?,
            ..DispatchReport::default()
        };
        if report.orphaned > 0 {
            warn!(count = report.orphaned, "Purged notifications for users without a channel");
        }

        let pending = self.db.pending_notifications().await?;
        if pending.is_empty() {
            debug!("No notifications to send");
            return Ok(report);
        }

        for entry in pending {
            let Some(sender) = self.registry.get(&entry.channel_type) else {
                error!(
                    id = entry.id,
                    user_id = %entry.user_id,
                    channel_type = %entry.channel_type,
                    "No sender for channel type; dropping notification"
                );
                self.db.delete_notification(entry.id).await?;
                report.dropped += 1;
                continue;
            };

            match sender
                .send(&entry.message, &entry.title, &entry.config)
                .await
            {
                Ok(()) => {
                    self.db.delete_notification(entry.id).await?;
                    info!(
                        id = entry.id,
                        user_id = %entry.user_id,
                        channel = sender.label(),
                        "Notification sent"
                    );
                    report.sent += 1;
                }
                Err(e) => {
                    warn!(
                        id = entry.id,
                        user_id = %entry.user_id,
                        channel = sender.label(),
                        error = %e,
                        "Notification failed; will retry"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Periodic dispatch step.
pub struct NotifyTask(pub Arc<Dispatcher>);

#[async_trait]
impl PeriodicTask for NotifyTask {
    fn name(&self) -> &'static str {
        "notify"
    }

    async fn run_once(&self) {
        if let Err(e) = self.0.dispatch().await {
            warn!(error = %e, "Notification dispatch failed; retrying next tick");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::notifications::Sender;

    #[derive(Default)]
    struct RecordingSender {
        fail: AtomicBool,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Sender for RecordingSender {
        fn channel_type(&self) -> &'static str {
            "recording"
        }

        fn label(&self) -> &'static str {
            "Recording"
        }

        fn validate(&self, _config: &str) -> Result<(), NotificationError> {
            Ok(())
        }

        async fn send(
            &self,
            _message: &str,
            _title: &str,
            _config: &str,
        ) -> Result<(), NotificationError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(NotificationError::ApiError {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(())
        }
    }

    async fn setup() -> (CatalogDatabase, Arc<RecordingSender>, Dispatcher) {
        let db = CatalogDatabase::open_in_memory().await.unwrap();
        let sender = Arc::new(RecordingSender::default());
        let mut registry = SenderRegistry::new();
        registry.register(sender.clone());
        let dispatcher = Dispatcher::new(db.clone(), Arc::new(registry));
        (db, sender, dispatcher)
    }

    #[tokio::test]
    async fn delivered_entries_are_removed() {
        let (db, sender, dispatcher) = setup().await;
        db.set_user_notification("u1", "recording", "{}").await.unwrap();
        db.enqueue_notification("u1", "t1", "m1").await.unwrap();
        db.enqueue_notification("u1", "t2", "m2").await.unwrap();

        let report = dispatcher.dispatch().await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);
        assert!(db.list_queued_notifications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_entries_stay_queued_and_retry() {
        let (db, sender, dispatcher) = setup().await;
        db.set_user_notification("u1", "recording", "{}").await.unwrap();
        db.enqueue_notification("u1", "t", "m").await.unwrap();
        sender.fail.store(true, Ordering::SeqCst);

        let report = dispatcher.dispatch().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(db.list_queued_notifications().await.unwrap().len(), 1);

        let report = dispatcher.dispatch().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);

        sender.fail.store(false, Ordering::SeqCst);
        let report = dispatcher.dispatch().await.unwrap();
        assert_eq!(report.sent, 1);
        assert!(db.list_queued_notifications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_type_is_dropped() {
        let (db, sender, dispatcher) = setup().await;
        db.set_user_notification("u1", "carrier-pigeon", "{}")
            .await
            .unwrap();
        db.enqueue_notification("u1", "t", "m").await.unwrap();

        let report = dispatcher.dispatch().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 0);
        assert!(db.list_queued_notifications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entries_without_channel_are_purged() {
        let (db, _sender, dispatcher) = setup().await;
        db.enqueue_notification("nobody", "t", "m").await.unwrap();

        let report = dispatcher.dispatch().await.unwrap();
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.sent, 0);
        assert!(db.list_queued_notifications().await.unwrap().is_empty());
    }
}

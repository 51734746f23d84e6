//! Session lifecycle worker.
//!
//! Each tick walks the flag handshake in a fixed order:
//!
//! 1. partition live sessions into expired and aging
//! 2. terminate expired sessions (servers wanted off)
//! 3. warn aging sessions once
//! 4. announce newly started or ended sessions
//! 5. for terminated sessions whose group is observably off, send the
//!    "servers off" notice and then delete the session
//! 6. notify live sessions whose whole group is observably on
//!
//! Every flag flip and its notification share a transaction. A guarded update
//! that matches nothing means another tick already handled it.

use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use ez2boot_core::db::unix_timestamp;
use tracing::{debug, info, warn};

use crate::scheduler::PeriodicTask;
use crate::storage::{CatalogDatabase, DatabaseError, QueuedMessage, ServerSession};

/// Transitions performed by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    pub expired: usize,
    pub warned: usize,
    pub announced: usize,
    pub off_notified: usize,
    pub cleaned: usize,
    pub ready: usize,
}

impl LifecycleReport {
    pub const fn is_empty(&self) -> bool {
        self.expired == 0
            && self.warned == 0
            && self.announced == 0
            && self.off_notified == 0
            && self.cleaned == 0
            && self.ready == 0
    }
}

pub struct SessionLifecycle {
    db: CatalogDatabase,
    warning_window: i64,
}

impl SessionLifecycle {
    pub fn new(db: CatalogDatabase, warning_window: Duration) -> Self {
        Self {
            db,
            warning_window: i64::try_from(warning_window.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub async fn tick(&self) -> LifecycleReport {
        self.tick_at(unix_timestamp()).await
    }

    /// Run one tick as if the clock read `now`.
    pub async fn tick_at(&self, now: i64) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        if let Err(e) = self.expire_and_warn(now, &mut report).await {
            warn!(error = %e, "Failed to process expiring sessions");
        }
        if let Err(e) = self.announce(now, &mut report).await {
            warn!(error = %e, "Failed to announce sessions");
        }
        if let Err(e) = self.cleanup(now, &mut report).await {
            warn!(error = %e, "Failed to clean up sessions");
        }
        if let Err(e) = self.notify_ready(now, &mut report).await {
            warn!(error = %e, "Failed to notify ready sessions");
        }

        if report.is_empty() {
            debug!("Session tick: nothing to do");
        } else {
            info!(?report, "Session tick complete");
        }
        report
    }

    async fn expire_and_warn(
        &self,
        now: i64,
        report: &mut LifecycleReport,
    ) -> Result<(), DatabaseError> {
        let sessions = self.db.active_sessions().await?;
        let threshold = now.saturating_add(self.warning_window);

        let (expired, live): (Vec<_>, Vec<_>) = sessions.into_iter().partition(|s| s.expiry < now);
        let aging = live
            .into_iter()
            .filter(|s| s.expiry < threshold && s.warning_notified == 0);

        for session in &expired {
            match self.db.end_session(&session.server_group, now).await {
                Ok(true) => {
                    info!(server_group = %session.server_group, "Session expired");
                    report.expired += 1;
                }
                Ok(false) => debug!(server_group = %session.server_group, "Session already ended"),
                Err(e) => warn!(server_group = %session.server_group, error = %e, "Failed to end expired session"),
            }
        }

        for session in aging {
            let message = format!(
                "Session for server group {} expires at {}",
                session.server_group,
                format_time(session.expiry)
            );
            let notice = QueuedMessage {
                title: &format!("Server group {} expiring soon", session.server_group),
                message: &message,
            };
            match self.db.mark_warning_notified(&session, notice, now).await {
                Ok(true) => {
                    info!(server_group = %session.server_group, "Expiry warning queued");
                    report.warned += 1;
                }
                Ok(false) => debug!(server_group = %session.server_group, "Warning already sent"),
                Err(e) => warn!(server_group = %session.server_group, error = %e, "Failed to queue expiry warning"),
            }
        }

        Ok(())
    }

    async fn announce(&self, now: i64, report: &mut LifecycleReport) -> Result<(), DatabaseError> {
        for session in self.db.sessions_to_announce().await? {
            let (title, message) = if session.is_terminated() {
                (
                    format!("Server group {} session ended", session.server_group),
                    format!(
                        "Session for server group {} has ended; servers are shutting down",
                        session.server_group
                    ),
                )
            } else {
                (
                    format!("Server group {} session started", session.server_group),
                    format!(
                        "Session for server group {} has started and expires at {}",
                        session.server_group,
                        format_time(session.expiry)
                    ),
                )
            };
            let notice = QueuedMessage {
                title: &title,
                message: &message,
            };
            match self.db.mark_announced(&session, notice, now).await {
                Ok(true) => report.announced += 1,
                Ok(false) => debug!(server_group = %session.server_group, "Session already announced"),
                Err(e) => warn!(server_group = %session.server_group, error = %e, "Failed to announce session"),
            }
        }
        Ok(())
    }

    async fn cleanup(&self, now: i64, report: &mut LifecycleReport) -> Result<(), DatabaseError> {
        for session in self.db.sessions_ready_for_cleanup().await? {
            if session.off_notified == 0 {
                let message = format!(
                    "All servers in server group {} are now off",
                    session.server_group
                );
                let notice = QueuedMessage {
                    title: &format!("Server group {} offline", session.server_group),
                    message: &message,
                };
                match self.db.mark_off_notified(&session, notice, now).await {
                    Ok(true) => report.off_notified += 1,
                    Ok(false) => debug!(server_group = %session.server_group, "Off notice already sent"),
                    Err(e) => {
                        warn!(server_group = %session.server_group, error = %e, "Failed to queue off notice");
                        continue;
                    }
                }
            }

            match self.db.finalize_session(&session).await {
                Ok(true) => {
                    info!(server_group = %session.server_group, "Session cleaned up");
                    report.cleaned += 1;
                }
                Ok(false) => debug!(server_group = %session.server_group, "Session already cleaned up"),
                Err(e) => warn!(server_group = %session.server_group, error = %e, "Failed to clean up session"),
            }
        }
        Ok(())
    }

    async fn notify_ready(
        &self,
        now: i64,
        report: &mut LifecycleReport,
    ) -> Result<(), DatabaseError> {
        for session in self.db.sessions_ready_for_use().await? {
            self.queue_ready(&session, now, report).await;
        }
        Ok(())
    }

    async fn queue_ready(&self, session: &ServerSession, now: i64, report: &mut LifecycleReport) {
        let message = format!(
            "Servers are online and ready for use: Server Group: {}",
            session.server_group
        );
        let notice = QueuedMessage {
            title: &format!("Server group {} online", session.server_group),
            message: &message,
        };
        match self.db.mark_on_notified(session, notice, now).await {
            Ok(true) => {
                info!(server_group = %session.server_group, "Session ready");
                report.ready += 1;
            }
            Ok(false) => debug!(server_group = %session.server_group, "Ready notice already sent"),
            Err(e) => warn!(server_group = %session.server_group, error = %e, "Failed to queue ready notice"),
        }
    }
}

fn format_time(timestamp: i64) -> String {
    let secs = u64::try_from(timestamp).unwrap_or_default();
    humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(secs)).to_string()
}

/// Periodic session lifecycle step.
pub struct SessionTask(pub std::sync::Arc<SessionLifecycle>);

#[async_trait]
impl PeriodicTask for SessionTask {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn run_once(&self) {
        self.0.tick().await;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn format_time_is_rfc3339() {
        assert_eq!(format_time(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_time(-5), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn report_emptiness() {
        assert!(LifecycleReport::default().is_empty());
        let report = LifecycleReport {
            ready: 1,
            ..LifecycleReport::default()
        };
        assert!(!report.is_empty());
    }
}

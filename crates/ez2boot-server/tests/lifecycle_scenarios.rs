//! End-to-end lease scenarios driven through the in-memory provider.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ez2boot_core::db::unix_timestamp;
use ez2boot_server::notifications::{Dispatcher, NotificationError, Sender, SenderRegistry};
use ez2boot_server::provider::{InMemoryProvider, ScrapedInstance};
use ez2boot_server::reconciler::Reconciler;
use ez2boot_server::session::{SessionError, SessionLifecycle, SessionService, hash_token};
use ez2boot_server::storage::{CatalogDatabase, ServerState};

#[derive(Default)]
struct InboxSender {
    fail: AtomicBool,
    attempts: AtomicUsize,
    delivered: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Sender for InboxSender {
    fn channel_type(&self) -> &'static str {
        "inbox"
    }

    fn label(&self) -> &'static str {
        "Inbox"
    }

    fn validate(&self, _config: &str) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn send(
        &self,
        _message: &str,
        title: &str,
        _config: &str,
    ) -> Result<(), NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Request("connection refused".into()));
        }
        self.delivered.lock().unwrap().push(title.to_string());
        Ok(())
    }
}

struct Harness {
    db: CatalogDatabase,
    cloud: Arc<InMemoryProvider>,
    inbox: Arc<InboxSender>,
    reconciler: Reconciler,
    service: SessionService,
    lifecycle: SessionLifecycle,
    dispatcher: Dispatcher,
}

async fn harness(instances: &[(&str, ServerState)]) -> Harness {
    let db = CatalogDatabase::open_in_memory().await.unwrap();
    let cloud = Arc::new(InMemoryProvider::new(instances.iter().map(|(id, state)| {
        ScrapedInstance {
            unique_id: (*id).to_string(),
            name: format!("qa-{id}"),
            server_group: "QA".to_string(),
            state: *state,
        }
    })));
    let inbox = Arc::new(InboxSender::default());
    let mut registry = SenderRegistry::new();
    registry.register(inbox.clone());
    db.set_user_notification("u1", "inbox", "{}").await.unwrap();

    let reconciler = Reconciler::new(db.clone(), cloud.clone());
    reconciler.scrape().await.unwrap();

    Harness {
        service: SessionService::new(db.clone()),
        lifecycle: SessionLifecycle::new(db.clone(), Duration::from_secs(15 * 60)),
        dispatcher: Dispatcher::new(db.clone(), Arc::new(registry)),
        reconciler,
        cloud,
        inbox,
        db,
    }
}

async fn three_off_servers() -> Harness {
    harness(&[
        ("i-1", ServerState::Off),
        ("i-2", ServerState::Off),
        ("i-3", ServerState::Off),
    ])
    .await
}

#[tokio::test]
async fn scenario_a_create_session_on_idle_group() {
    let h = three_off_servers().await;
    let now = unix_timestamp();

    let created = h
        .service
        .create_session("u1", "qa@example.com", "QA", "1h")
        .await
        .unwrap();

    let servers = h.db.servers_in_group("QA").await.unwrap();
    assert_eq!(servers.len(), 3);
    assert!(servers.iter().all(|s| s.next_state.as_deref() == Some("on")));

    let session = h.db.get_session_by_group("QA").await.unwrap().unwrap();
    assert_eq!(session.to_notify, 1);
    assert!((session.expiry - (now + 3600)).abs() <= 1);
    assert_eq!(session.token, Some(hash_token(&created.token)));
}

#[tokio::test]
async fn scenario_b_expired_session_is_terminated() {
    let h = three_off_servers().await;
    let created = h
        .service
        .create_session("u1", "qa@example.com", "QA", "1h")
        .await
        .unwrap();
    h.reconciler.reconcile().await.unwrap();
    h.reconciler.scrape().await.unwrap();

    h.lifecycle.tick_at(created.expiry + 1).await;

    let servers = h.db.servers_in_group("QA").await.unwrap();
    assert!(servers.iter().all(|s| s.next_state.as_deref() == Some("off")));
    let session = h.db.get_session_by_group("QA").await.unwrap().unwrap();
    assert!(session.token.is_none());
    assert_eq!(session.to_cleanup, 1);
}

#[tokio::test]
async fn scenario_c_cleanup_after_servers_reach_off() {
    let h = three_off_servers().await;
    let created = h
        .service
        .create_session("u1", "qa@example.com", "QA", "1h")
        .await
        .unwrap();
    h.reconciler.reconcile().await.unwrap();
    h.reconciler.scrape().await.unwrap();
    h.lifecycle.tick_at(created.expiry + 1).await;

    h.reconciler.reconcile().await.unwrap();
    h.reconciler.scrape().await.unwrap();
    h.lifecycle.tick_at(created.expiry + 2).await;

    assert!(h.db.get_session_by_group("QA").await.unwrap().is_none());
    let servers = h.db.servers_in_group("QA").await.unwrap();
    assert!(servers.iter().all(|s| s.next_state.is_none() && s.state == "off"));
}

#[tokio::test]
async fn scenario_d_extend_expired_token_is_rejected() {
    let h = three_off_servers().await;
    let created = h
        .service
        .create_session("u1", "qa@example.com", "QA", "1s")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let result = h.service.extend_session(&created.token, "30m").await;
    assert!(matches!(result, Err(SessionError::SessionNotFound)));
    let session = h.db.get_session_by_group("QA").await.unwrap().unwrap();
    assert_eq!(session.expiry, created.expiry);
}

#[tokio::test]
async fn scenario_e_failed_send_is_retried_next_tick() {
    let h = three_off_servers().await;
    h.db.enqueue_notification("u1", "hello", "world").await.unwrap();
    h.inbox.fail.store(true, Ordering::SeqCst);

    let report = h.dispatcher.dispatch().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.db.list_queued_notifications().await.unwrap().len(), 1);

    h.inbox.fail.store(false, Ordering::SeqCst);
    let report = h.dispatcher.dispatch().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.inbox.attempts.load(Ordering::SeqCst), 2);
    assert!(h.db.list_queued_notifications().await.unwrap().is_empty());
}

#[tokio::test]
async fn full_lease_loop() {
    let h = harness(&[("i-1", ServerState::Off), ("i-2", ServerState::Off)]).await;

    // Lease opens.
    let created = h
        .service
        .create_session("u1", "qa@example.com", "QA", "1h")
        .await
        .unwrap();
    assert_eq!(h.lifecycle.tick().await.announced, 1);

    // Reconciler starts both instances; a scrape observes them on.
    let manage = h.reconciler.reconcile().await.unwrap();
    assert_eq!(manage.started.len(), 2);
    assert_eq!(
        h.cloud.state_of("i-1").await,
        Some(ServerState::Transitioning)
    );
    h.reconciler.scrape().await.unwrap();
    assert_eq!(h.lifecycle.tick().await.ready, 1);

    let report = h.dispatcher.dispatch().await.unwrap();
    assert_eq!(report.sent, 2);

    // Nothing further happens while the lease is live.
    assert!(h.reconciler.reconcile().await.unwrap().started.is_empty());
    assert!(h.lifecycle.tick().await.is_empty());

    // Lease expires; servers are stopped and the session cleaned up.
    let expired = h.lifecycle.tick_at(created.expiry + 1).await;
    assert_eq!(expired.expired, 1);
    assert_eq!(expired.cleaned, 0);

    let manage = h.reconciler.reconcile().await.unwrap();
    assert_eq!(manage.stopped.len(), 2);
    h.reconciler.scrape().await.unwrap();

    let cleanup = h.lifecycle.tick_at(created.expiry + 2).await;
    assert_eq!(cleanup.off_notified, 1);
    assert_eq!(cleanup.cleaned, 1);

    let report = h.dispatcher.dispatch().await.unwrap();
    assert_eq!(report.sent, 2);
    assert!(h.db.list_queued_notifications().await.unwrap().is_empty());

    let delivered = h.inbox.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 4);
    assert!(delivered[0].contains("started"));
    assert!(delivered[1].contains("online"));
    assert!(delivered[2].contains("ended"));
    assert!(delivered[3].contains("offline"));

    assert!(h.db.get_session_by_group("QA").await.unwrap().is_none());
    assert!(h
        .db
        .servers_in_group("QA")
        .await
        .unwrap()
        .iter()
        .all(|s| s.next_state.is_none()));
}

#[tokio::test]
async fn partial_start_failure_is_retried_next_cycle() {
    let h = harness(&[("i-1", ServerState::Off), ("i-2", ServerState::Off)]).await;
    h.cloud.set_failing("i-2", true).await;
    h.service
        .create_session("u1", "qa@example.com", "QA", "1h")
        .await
        .unwrap();

    h.reconciler.reconcile().await.unwrap();
    h.reconciler.scrape().await.unwrap();
    assert_eq!(h.db.get_server("i-1").await.unwrap().state, "on");
    assert_eq!(h.db.get_server("i-2").await.unwrap().state, "off");
    assert_eq!(h.lifecycle.tick().await.ready, 0);

    h.cloud.set_failing("i-2", false).await;
    let manage = h.reconciler.reconcile().await.unwrap();
    assert_eq!(manage.started.len(), 1);
    h.reconciler.scrape().await.unwrap();
    assert_eq!(h.lifecycle.tick().await.ready, 1);
}

#[tokio::test]
async fn instance_added_while_ending_does_not_strand_the_group() {
    let h = three_off_servers().await;
    let created = h
        .service
        .create_session("u1", "qa@example.com", "QA", "1h")
        .await
        .unwrap();
    h.reconciler.reconcile().await.unwrap();
    h.reconciler.scrape().await.unwrap();

    assert_eq!(h.service.end_session(&created.token).await.unwrap(), "QA");
    h.cloud
        .upsert(ScrapedInstance {
            unique_id: "i-4".to_string(),
            name: "qa-i-4".to_string(),
            server_group: "QA".to_string(),
            state: ServerState::Off,
        })
        .await;

    for _ in 0..3 {
        h.lifecycle.tick().await;
        h.reconciler.reconcile().await.unwrap();
        h.reconciler.scrape().await.unwrap();
    }
    h.lifecycle.tick().await;

    assert!(h.db.get_session_by_group("QA").await.unwrap().is_none());
    let servers = h.db.servers_in_group("QA").await.unwrap();
    assert_eq!(servers.len(), 4);
    assert!(servers.iter().all(|s| s.state == "off" && s.next_state.is_none()));

    h.service
        .create_session("u2", "dev@example.com", "QA", "30m")
        .await
        .unwrap();
}

#[tokio::test]
async fn instance_added_mid_lease_is_started_before_ready() {
    let h = three_off_servers().await;
    h.service
        .create_session("u1", "qa@example.com", "QA", "1h")
        .await
        .unwrap();
    h.cloud
        .upsert(ScrapedInstance {
            unique_id: "i-4".to_string(),
            name: "qa-i-4".to_string(),
            server_group: "QA".to_string(),
            state: ServerState::Off,
        })
        .await;
    h.reconciler.scrape().await.unwrap();

    let manage = h.reconciler.reconcile().await.unwrap();
    assert_eq!(manage.started.len(), 4);
    h.reconciler.scrape().await.unwrap();
    assert_eq!(h.lifecycle.tick().await.ready, 1);
}

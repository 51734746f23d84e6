//! Concurrent lease creation against a file-backed catalog.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use ez2boot_core::db::unix_timestamp;
use ez2boot_server::provider::ScrapedInstance;
use ez2boot_server::session::{SessionError, SessionService};
use ez2boot_server::storage::{CatalogDatabase, ServerState};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_concurrent_create_wins() {
    let dir = tempfile::tempdir().unwrap();
    let db = CatalogDatabase::open(&dir.path().join("catalog.db"))
        .await
        .unwrap();
    let instances: Vec<ScrapedInstance> = (1..=3)
        .map(|n| ScrapedInstance {
            unique_id: format!("i-{n}"),
            name: format!("qa-{n}"),
            server_group: "QA".to_string(),
            state: ServerState::Off,
        })
        .collect();
    db.sync_catalog(&instances, unix_timestamp()).await.unwrap();

    let service = SessionService::new(db.clone());
    let attempts: Vec<_> = (0..4)
        .map(|n| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .create_session(&format!("u{n}"), &format!("u{n}@example.com"), "QA", "1h")
                    .await
            })
        })
        .collect();

    let mut created = 0;
    let mut in_use = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => created += 1,
            Err(SessionError::ServerGroupInUse(_)) => in_use += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(in_use, 3);
    assert_eq!(service.list_sessions().await.unwrap().len(), 1);

    let session = db.get_session_by_group("QA").await.unwrap().unwrap();
    let servers = db.servers_in_group("QA").await.unwrap();
    assert!(servers
        .iter()
        .all(|s| s.last_user.as_deref() == Some(session.email.as_str())));
}

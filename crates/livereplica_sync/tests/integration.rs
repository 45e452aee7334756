//! Integration tests for sync sessions against an in-memory upstream.

use async_trait::async_trait;
use livereplica_core::{ChangeEvent, CoreError, Document, DocumentId, UpdateDescription};
use livereplica_sync::{
    FeedMessage, MemoryUpstream, ReplicaNotification, SessionConfig, SessionState,
    SnapshotSource, SortSpec, Sources, SyncError, SyncResult, SyncSession, UpstreamCall,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

const WAIT: Duration = Duration::from_secs(5);

fn doc(value: Value) -> Document {
    Document::from_value(value, "_id").unwrap()
}

fn bodies(session: &SyncSession) -> Vec<Value> {
    session.documents().iter().map(Document::to_value).collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_state(session: &SyncSession, state: SessionState) {
    let mut rx = session.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

fn upstream_with(documents: Vec<Value>) -> Arc<MemoryUpstream> {
    let upstream = Arc::new(MemoryUpstream::new());
    upstream.seed("events", documents.into_iter().map(doc));
    upstream
}

async fn live_session(upstream: &Arc<MemoryUpstream>) -> SyncSession {
    SyncSession::start(
        SessionConfig::new("events"),
        Sources::from_upstream(Arc::clone(upstream)),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn snapshot_loaded_in_sort_order() {
    let upstream = upstream_with(vec![
        json!({"_id": 1, "createdAt": 10}),
        json!({"_id": 2, "createdAt": 30}),
        json!({"_id": 3, "createdAt": 20}),
    ]);

    let session = live_session(&upstream).await;

    assert_eq!(session.state(), SessionState::Live);
    assert_eq!(session.len(), 3);
    let ids: Vec<_> = session
        .documents()
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    assert_eq!(ids, vec!["2", "3", "1"]);
    assert_eq!(session.stats().snapshot_documents, 3);
    assert!(session.stats().live_since.is_some());
    session.replica().check_invariants().unwrap();

    session.stop().await;
}

#[tokio::test]
async fn collection_ensured_and_feed_opened_before_snapshot() {
    let upstream = upstream_with(vec![]);
    let session = live_session(&upstream).await;

    assert_eq!(
        upstream.calls(),
        vec![
            UpstreamCall::EnsureExists("events".into()),
            UpstreamCall::Subscribe("events".into()),
            UpstreamCall::Query("events".into()),
        ]
    );
    session.stop().await;
}

#[tokio::test]
async fn changes_during_snapshot_are_buffered_and_drained() {
    let upstream = upstream_with(vec![json!({"_id": 1, "createdAt": 10})]);
    upstream.hold_snapshots();

    let session = SyncSession::spawn(
        SessionConfig::new("events"),
        Sources::from_upstream(Arc::clone(&upstream)),
    )
    .unwrap();
    wait_until(|| upstream.subscriber_count("events") == 1).await;

    upstream
        .insert_value("events", json!({"_id": 2, "createdAt": 20}))
        .unwrap();
    upstream.delete("events", &DocumentId::from(1)).unwrap();
    wait_until(|| session.stats().events_buffered == 2).await;
    assert_eq!(session.state(), SessionState::Initializing);
    assert!(session.is_empty());

    upstream.release_snapshots();
    session.ready().await.unwrap();

    assert_eq!(bodies(&session), vec![json!({"_id": 2, "createdAt": 20})]);
    let stats = session.stats();
    assert_eq!(stats.events_received, 2);
    assert_eq!(stats.events_skipped, 2);
    session.stop().await;
}

/// Snapshot source whose result is handed in by the test.
struct ScriptedSnapshot {
    result: Mutex<Option<oneshot::Receiver<Vec<Document>>>>,
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshot {
    async fn query(
        &self,
        _collection: &str,
        _sort: &SortSpec,
        _limit: usize,
    ) -> SyncResult<Vec<Document>> {
        let receiver = self
            .result
            .lock()
            .await
            .take()
            .ok_or_else(|| SyncError::snapshot("queried twice"))?;
        receiver
            .await
            .map_err(|_| SyncError::snapshot("script dropped"))
    }
}

#[tokio::test]
async fn stale_snapshot_interleaved_with_feed() {
    let upstream = Arc::new(MemoryUpstream::new());
    let (snapshot_tx, snapshot_rx) = oneshot::channel();
    let snapshot = Arc::new(ScriptedSnapshot {
        result: Mutex::new(Some(snapshot_rx)),
    });
    let sources = Sources::new(snapshot, upstream.clone(), upstream.clone());

    let session = SyncSession::spawn(SessionConfig::new("events"), sources).unwrap();
    wait_until(|| upstream.subscriber_count("events") == 1).await;

    // Insert arrives before the snapshot completes.
    upstream
        .insert_value("events", json!({"_id": 2, "createdAt": 20}))
        .unwrap();
    wait_until(|| session.stats().events_buffered == 1).await;

    // The snapshot was taken before the insert.
    snapshot_tx
        .send(vec![doc(json!({"_id": 1, "createdAt": 10}))])
        .unwrap();
    session.ready().await.unwrap();

    // Delete arrives after the snapshot completed.
    upstream.publish(
        "events",
        FeedMessage::Change(ChangeEvent::delete(DocumentId::from(1))),
    );
    wait_until(|| session.len() == 1).await;

    assert_eq!(bodies(&session), vec![json!({"_id": 2, "createdAt": 20})]);
    session.stop().await;
}

#[tokio::test]
async fn live_changes_are_applied() {
    let upstream = upstream_with(vec![json!({"_id": 4, "createdAt": 1, "a": {"b": 1}})]);
    let session = live_session(&upstream).await;

    upstream
        .update(
            "events",
            &DocumentId::from(4),
            UpdateDescription::new().set("a.c", json!(2)).unset("a.z"),
        )
        .unwrap();
    upstream
        .insert_value("events", json!({"_id": 5, "createdAt": 2}))
        .unwrap();
    wait_until(|| session.len() == 2).await;

    assert_eq!(
        bodies(&session),
        vec![
            json!({"_id": 5, "createdAt": 2}),
            json!({"_id": 4, "createdAt": 1, "a": {"b": 1, "c": 2}}),
        ]
    );
    session.stop().await;
}

#[tokio::test]
async fn replace_before_insert_is_inserted() {
    let upstream = upstream_with(vec![]);
    let session = live_session(&upstream).await;

    upstream.publish(
        "events",
        FeedMessage::Change(ChangeEvent::replace(doc(
            json!({"_id": 3, "createdAt": 5, "body": "X"}),
        ))),
    );
    wait_until(|| session.len() == 1).await;

    assert_eq!(
        session.get(&DocumentId::from(3)).unwrap().to_value(),
        json!({"_id": 3, "createdAt": 5, "body": "X"})
    );
    session.stop().await;
}

#[tokio::test]
async fn feed_inserts_are_not_capped_by_limit() {
    let upstream = upstream_with(vec![
        json!({"_id": 1, "createdAt": 1}),
        json!({"_id": 2, "createdAt": 2}),
        json!({"_id": 3, "createdAt": 3}),
    ]);
    let session = SyncSession::start(
        SessionConfig::new("events").with_limit(2),
        Sources::from_upstream(Arc::clone(&upstream)),
    )
    .await
    .unwrap();
    assert_eq!(session.len(), 2);

    for id in 4..7u64 {
        upstream
            .insert_value("events", json!({"_id": id, "createdAt": id}))
            .unwrap();
    }
    wait_until(|| session.len() == 5).await;
    session.stop().await;
}

#[tokio::test]
async fn sort_key_change_fails_session() {
    let upstream = upstream_with(vec![json!({"_id": 4, "createdAt": 1})]);
    let session = live_session(&upstream).await;
    let mut notifications = session.subscribe();

    upstream
        .update(
            "events",
            &DocumentId::from(4),
            UpdateDescription::new().set("createdAt", json!(99)),
        )
        .unwrap();
    wait_for_state(&session, SessionState::Failed).await;

    let err = session.error().unwrap();
    assert!(err.is_integrity_violation());
    assert_eq!(
        session.get(&DocumentId::from(4)).unwrap().get("createdAt"),
        Some(&json!(1))
    );

    // Later writes are not applied.
    upstream
        .insert_value("events", json!({"_id": 5, "createdAt": 5}))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.len(), 1);

    let mut saw_failed = false;
    while let Ok(notification) = notifications.try_recv() {
        saw_failed |= matches!(notification, ReplicaNotification::Failed { .. });
    }
    assert!(saw_failed);
    session.stop().await;
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn oversized_array_index_fails_session() {
    let upstream = upstream_with(vec![json!({"_id": 4, "createdAt": 1, "tags": []})]);
    let session = live_session(&upstream).await;

    upstream.publish(
        "events",
        FeedMessage::Change(ChangeEvent::update(
            DocumentId::from(4),
            UpdateDescription::new().set("tags.4000000000000000000", json!(1)),
        )),
    );
    wait_for_state(&session, SessionState::Failed).await;

    assert!(matches!(
        session.error(),
        Some(SyncError::Core(CoreError::PathConflict { .. }))
    ));
    session.stop().await;
}

/// Snapshot source that panics instead of answering.
struct PanickingSnapshot;

#[async_trait]
impl SnapshotSource for PanickingSnapshot {
    async fn query(
        &self,
        _collection: &str,
        _sort: &SortSpec,
        _limit: usize,
    ) -> SyncResult<Vec<Document>> {
        panic!("snapshot source bug");
    }
}

#[tokio::test]
async fn panicking_task_fails_session() {
    let upstream = upstream_with(vec![]);
    let sources = Sources::new(Arc::new(PanickingSnapshot), upstream.clone(), upstream.clone());

    let session = SyncSession::spawn(SessionConfig::new("events"), sources).unwrap();
    wait_for_state(&session, SessionState::Failed).await;

    assert!(matches!(session.ready().await, Err(SyncError::Task(_))));
    session.stop().await;
    assert_eq!(session.state(), SessionState::Failed);
    assert!(matches!(session.error(), Some(SyncError::Task(_))));
}

#[tokio::test]
async fn feed_errors_are_reported_not_fatal() {
    let upstream = upstream_with(vec![]);
    let session = live_session(&upstream).await;
    let mut notifications = session.subscribe();

    upstream.inject_feed_error("events", "connection reset");
    upstream
        .insert_value("events", json!({"_id": 1, "createdAt": 1}))
        .unwrap();
    wait_until(|| session.len() == 1).await;

    let stats = session.stats();
    assert_eq!(stats.feed_errors, 1);
    assert!(stats.last_error.unwrap().contains("connection reset"));
    assert_eq!(session.state(), SessionState::Live);
    assert_eq!(
        notifications.recv().await,
        Some(ReplicaNotification::FeedError {
            message: "connection reset".into()
        })
    );
    session.stop().await;
}

#[tokio::test]
async fn invalidation_ends_session() {
    let upstream = upstream_with(vec![json!({"_id": 1, "createdAt": 1})]);
    let session = live_session(&upstream).await;

    upstream.invalidate("events");
    wait_for_state(&session, SessionState::Invalidated).await;

    assert!(matches!(
        session.error(),
        Some(SyncError::Invalidated { .. })
    ));
    assert_eq!(session.len(), 1);
    wait_until(|| upstream.subscriber_count("events") == 0).await;
}

#[tokio::test]
async fn feed_end_disconnects() {
    let upstream = upstream_with(vec![]);
    let session = live_session(&upstream).await;

    upstream.end_feeds("events");
    wait_for_state(&session, SessionState::Disconnected).await;

    session.stop().await;
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn stop_while_initializing() {
    let upstream = upstream_with(vec![json!({"_id": 1, "createdAt": 1})]);
    upstream.hold_snapshots();

    let session = SyncSession::spawn(
        SessionConfig::new("events"),
        Sources::from_upstream(Arc::clone(&upstream)),
    )
    .unwrap();
    wait_until(|| upstream.subscriber_count("events") == 1).await;

    session.stop().await;

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(upstream.subscriber_count("events"), 0);
    assert!(session.is_empty());
    assert_eq!(session.ready().await, Err(SyncError::Stopped));
}

#[tokio::test]
async fn stop_is_idempotent_and_final() {
    let upstream = upstream_with(vec![]);
    let session = live_session(&upstream).await;

    session.stop().await;
    session.stop().await;
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(upstream.subscriber_count("events"), 0);

    upstream
        .insert_value("events", json!({"_id": 1, "createdAt": 1}))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.is_empty());
}

#[tokio::test]
async fn start_fails_when_snapshot_fails() {
    let upstream = upstream_with(vec![]);
    upstream.fail_snapshots("permission denied");

    let err = SyncSession::start(
        SessionConfig::new("events"),
        Sources::from_upstream(Arc::clone(&upstream)),
    )
    .await
    .unwrap_err();

    assert_eq!(err, SyncError::snapshot("permission denied"));
    assert_eq!(upstream.subscriber_count("events"), 0);
}

#[tokio::test]
async fn start_fails_when_subscription_fails() {
    let upstream = upstream_with(vec![]);
    upstream.fail_subscriptions("not a replica set");

    let err = SyncSession::start(
        SessionConfig::new("events"),
        Sources::from_upstream(Arc::clone(&upstream)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SyncError::Feed { .. }));
    assert!(!upstream.calls().contains(&UpstreamCall::Query("events".into())));
}

#[tokio::test]
async fn invalid_config_rejected() {
    let upstream = upstream_with(vec![]);
    let err = SyncSession::spawn(
        SessionConfig::new("events").with_limit(0),
        Sources::from_upstream(upstream),
    )
    .unwrap_err();
    assert!(matches!(err, SyncError::InvalidConfig(_)));
}

#[tokio::test]
async fn independent_sessions() {
    let upstream = upstream_with(vec![json!({"_id": 1, "createdAt": 1})]);
    upstream.seed("other", vec![doc(json!({"_id": 9, "createdAt": 9}))]);

    let first = live_session(&upstream).await;
    let second = live_session(&upstream).await;
    let other = SyncSession::start(
        SessionConfig::new("other"),
        Sources::from_upstream(Arc::clone(&upstream)),
    )
    .await
    .unwrap();
    assert_ne!(first.id(), second.id());

    first.stop().await;
    upstream
        .insert_value("events", json!({"_id": 2, "createdAt": 2}))
        .unwrap();
    wait_until(|| second.len() == 2).await;

    assert_eq!(first.len(), 1);
    assert_eq!(other.len(), 1);
    assert_eq!(other.collection(), "other");

    second.stop().await;
    other.stop().await;
}

#[tokio::test]
async fn notifications_follow_the_protocol() {
    let upstream = upstream_with(vec![json!({"_id": 1, "createdAt": 10})]);
    let session = SyncSession::spawn(
        SessionConfig::new("events"),
        Sources::from_upstream(Arc::clone(&upstream)),
    )
    .unwrap();
    let mut notifications = session.subscribe();
    session.ready().await.unwrap();

    upstream.delete("events", &DocumentId::from(1)).unwrap();
    wait_until(|| session.is_empty()).await;
    session.stop().await;

    let mut received = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        received.push(notification);
    }
    assert_eq!(
        received,
        vec![
            ReplicaNotification::StateChanged(SessionState::Draining),
            ReplicaNotification::SnapshotLoaded { count: 1 },
            ReplicaNotification::StateChanged(SessionState::Live),
            ReplicaNotification::Removed {
                id: DocumentId::from(1),
                position: 0
            },
            ReplicaNotification::StateChanged(SessionState::Stopped),
        ]
    );
}

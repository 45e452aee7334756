//! In-process upstream for tests, replays and demos.

use crate::config::{SortDirection, SortSpec};
use crate::error::{SyncError, SyncResult};
use crate::source::{ChannelFeed, CollectionEnsurer, FeedHandle, FeedMessage, FeedSource, SnapshotSource};
use async_trait::async_trait;
use livereplica_core::{path, ChangeEvent, CoreError, Document, DocumentId, UpdateDescription};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// A call made against a [`MemoryUpstream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCall {
    /// `ensure_exists(collection)`.
    EnsureExists(String),
    /// `subscribe(collection)`.
    Subscribe(String),
    /// `query(collection, ..)`.
    Query(String),
}

/// An in-memory document database with change feeds.
///
/// Writes are published to every open feed of the collection in the
/// order they are made. Snapshot queries can be held behind a gate so that
/// tests control when the snapshot is taken relative to feed traffic.
///
/// Updates are applied as given; the upstream does not protect the sort
/// key, which lets tests provoke integrity violations downstream.
#[derive(Debug)]
pub struct MemoryUpstream {
    id_field: String,
    collections: RwLock<HashMap<String, Vec<Document>>>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<FeedMessage>>>>,
    gate: watch::Sender<bool>,
    snapshot_failure: RwLock<Option<String>>,
    subscribe_failure: RwLock<Option<String>>,
    calls: Mutex<Vec<UpstreamCall>>,
}

impl MemoryUpstream {
    /// Creates an empty upstream using `_id` as the id field.
    pub fn new() -> Self {
        Self::with_id_field("_id")
    }

    /// Creates an empty upstream with a custom id field.
    pub fn with_id_field(id_field: impl Into<String>) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            id_field: id_field.into(),
            collections: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            gate,
            snapshot_failure: RwLock::new(None),
            subscribe_failure: RwLock::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the id field.
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Stores documents without publishing them.
    pub fn seed(&self, collection: &str, documents: impl IntoIterator<Item = Document>) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    /// Inserts a document and publishes the insert.
    pub fn insert(&self, collection: &str, document: Document) -> SyncResult<()> {
        let mut collections = self.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.iter().any(|d| d.id() == document.id()) {
            return Err(CoreError::DuplicateId {
                id: document.id().to_string(),
            }
            .into());
        }
        documents.push(document.clone());
        self.publish(collection, FeedMessage::Change(ChangeEvent::insert(document)));
        Ok(())
    }

    /// Inserts a JSON object, reading its id from the id field.
    pub fn insert_value(&self, collection: &str, value: Value) -> SyncResult<()> {
        let document = Document::from_value(value, &self.id_field)?;
        self.insert(collection, document)
    }

    /// Replaces a stored document and publishes the replace.
    pub fn replace(&self, collection: &str, document: Document) -> SyncResult<()> {
        let mut collections = self.collections.write();
        let slot = collections
            .get_mut(collection)
            .and_then(|documents| documents.iter_mut().find(|d| d.id() == document.id()))
            .ok_or_else(|| not_found(collection, document.id()))?;
        *slot = document.clone();
        self.publish(collection, FeedMessage::Change(ChangeEvent::replace(document)));
        Ok(())
    }

    /// Applies a partial update and publishes it.
    pub fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        description: UpdateDescription,
    ) -> SyncResult<()> {
        let mut collections = self.collections.write();
        let document = collections
            .get_mut(collection)
            .and_then(|documents| documents.iter_mut().find(|d| d.id() == id))
            .ok_or_else(|| not_found(collection, id))?;

        let body = document.body_mut();
        path::apply_removed_fields(body, &description.removed_fields)?;
        path::apply_truncated_arrays(body, &description.truncated_arrays)?;
        path::apply_updated_fields(body, &description.updated_fields)?;

        self.publish(
            collection,
            FeedMessage::Change(ChangeEvent::update(id.clone(), description)),
        );
        Ok(())
    }

    /// Deletes a document and publishes the delete.
    pub fn delete(&self, collection: &str, id: &DocumentId) -> SyncResult<()> {
        let mut collections = self.collections.write();
        let documents = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, id))?;
        let position = documents
            .iter()
            .position(|d| d.id() == id)
            .ok_or_else(|| not_found(collection, id))?;
        documents.remove(position);
        self.publish(collection, FeedMessage::Change(ChangeEvent::delete(id.clone())));
        Ok(())
    }

    /// Publishes a message to open feeds without touching stored data.
    pub fn publish(&self, collection: &str, message: FeedMessage) {
        let mut subscribers = self.subscribers.write();
        if let Some(senders) = subscribers.get_mut(collection) {
            senders.retain(|tx| tx.send(message.clone()).is_ok());
        }
    }

    /// Invalidates every open feed of `collection`.
    pub fn invalidate(&self, collection: &str) {
        self.publish(collection, FeedMessage::Change(ChangeEvent::Invalidate));
    }

    /// Reports a transport error on every open feed of `collection`.
    pub fn inject_feed_error(&self, collection: &str, message: impl Into<String>) {
        self.publish(collection, FeedMessage::Error(message.into()));
    }

    /// Ends every open feed of `collection`.
    pub fn end_feeds(&self, collection: &str) {
        self.subscribers.write().remove(collection);
    }

    /// Holds snapshot queries until [`release_snapshots`](Self::release_snapshots).
    pub fn hold_snapshots(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held and future snapshot queries run.
    pub fn release_snapshots(&self) {
        self.gate.send_replace(true);
    }

    /// Makes snapshot queries fail with `message`.
    pub fn fail_snapshots(&self, message: impl Into<String>) {
        *self.snapshot_failure.write() = Some(message.into());
    }

    /// Makes feed subscriptions fail with `message`.
    pub fn fail_subscriptions(&self, message: impl Into<String>) {
        *self.subscribe_failure.write() = Some(message.into());
    }

    /// Returns the number of open feeds for `collection`.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.subscribers
            .read()
            .get(collection)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Returns true if `collection` exists.
    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    /// Returns the stored documents of `collection` in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns every call made so far, in order.
    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: UpstreamCall) {
        self.calls.lock().push(call);
    }
}

impl Default for MemoryUpstream {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(collection: &str, id: &DocumentId) -> SyncError {
    SyncError::collection(collection, format!("document '{id}' not found"))
}

#[async_trait]
impl SnapshotSource for MemoryUpstream {
    async fn query(
        &self,
        collection: &str,
        sort: &SortSpec,
        limit: usize,
    ) -> SyncResult<Vec<Document>> {
        self.record(UpstreamCall::Query(collection.to_string()));

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(SyncError::snapshot("upstream shut down"));
        }

        if let Some(message) = self.snapshot_failure.read().clone() {
            return Err(SyncError::snapshot(message));
        }

        let mut documents = self.documents(collection);
        documents.sort_by(|a, b| {
            let order = a.sort_key(&sort.field).cmp(&b.sort_key(&sort.field));
            match sort.direction {
                SortDirection::Ascending => order,
                SortDirection::Descending => order.reverse(),
            }
        });
        documents.truncate(limit);
        debug!(collection, returned = documents.len(), "snapshot served");
        Ok(documents)
    }
}

#[async_trait]
impl FeedSource for MemoryUpstream {
    async fn subscribe(&self, collection: &str) -> SyncResult<Box<dyn FeedHandle>> {
        self.record(UpstreamCall::Subscribe(collection.to_string()));

        if let Some(message) = self.subscribe_failure.read().clone() {
            return Err(SyncError::feed(message));
        }

        let (sender, feed) = ChannelFeed::channel();
        self.subscribers
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(sender);
        Ok(Box::new(feed))
    }
}

#[async_trait]
impl CollectionEnsurer for MemoryUpstream {
    async fn ensure_exists(&self, collection: &str) -> SyncResult<()> {
        self.record(UpstreamCall::EnsureExists(collection.to_string()));
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value, "_id").unwrap()
    }

    #[tokio::test]
    async fn snapshot_sorted_and_limited() {
        let upstream = MemoryUpstream::new();
        upstream.seed(
            "events",
            vec![
                doc(json!({"_id": 1, "createdAt": 10})),
                doc(json!({"_id": 2, "createdAt": 30})),
                doc(json!({"_id": 3, "createdAt": 20})),
            ],
        );

        let documents = upstream
            .query("events", &SortSpec::descending("createdAt"), 2)
            .await
            .unwrap();
        let ids: Vec<_> = documents.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn writes_are_published_in_order() {
        let upstream = MemoryUpstream::new();
        let mut feed = upstream.subscribe("events").await.unwrap();

        upstream
            .insert_value("events", json!({"_id": 1, "createdAt": 1}))
            .unwrap();
        upstream
            .update(
                "events",
                &DocumentId::from(1),
                UpdateDescription::new().set("a.b", json!(2)),
            )
            .unwrap();
        upstream.delete("events", &DocumentId::from(1)).unwrap();

        let kinds: Vec<_> = [
            feed.next().await.unwrap(),
            feed.next().await.unwrap(),
            feed.next().await.unwrap(),
        ]
        .into_iter()
        .map(|message| match message {
            FeedMessage::Change(event) => event.kind().to_string(),
            FeedMessage::Error(message) => message,
        })
        .collect();
        assert_eq!(kinds, vec!["insert", "update", "delete"]);
        assert!(upstream.documents("events").is_empty());
    }

    #[tokio::test]
    async fn update_edits_stored_copy() {
        let upstream = MemoryUpstream::new();
        upstream
            .insert_value("events", json!({"_id": 4, "createdAt": 1, "a": {"b": 1}}))
            .unwrap();
        upstream
            .update(
                "events",
                &DocumentId::from(4),
                UpdateDescription::new().set("a.c", json!(2)),
            )
            .unwrap();

        assert_eq!(
            upstream.documents("events")[0].to_value(),
            json!({"_id": 4, "createdAt": 1, "a": {"b": 1, "c": 2}})
        );
    }

    #[tokio::test]
    async fn ended_feeds_close() {
        let upstream = MemoryUpstream::new();
        let mut feed = upstream.subscribe("events").await.unwrap();
        assert_eq!(upstream.subscriber_count("events"), 1);

        upstream.end_feeds("events");
        assert_eq!(feed.next().await, None);
        assert_eq!(upstream.subscriber_count("events"), 0);
    }

    #[tokio::test]
    async fn missing_documents_are_errors() {
        let upstream = MemoryUpstream::new();
        assert!(upstream.delete("events", &DocumentId::from(1)).is_err());
        assert!(upstream
            .insert_value("events", json!({"createdAt": 1}))
            .is_err());

        upstream
            .insert_value("events", json!({"_id": 1, "createdAt": 1}))
            .unwrap();
        assert!(upstream
            .insert_value("events", json!({"_id": 1, "createdAt": 2}))
            .is_err());
    }

    #[tokio::test]
    async fn calls_are_recorded() {
        let upstream = MemoryUpstream::new();
        upstream.ensure_exists("events").await.unwrap();
        let _feed = upstream.subscribe("events").await.unwrap();
        upstream
            .query("events", &SortSpec::descending("createdAt"), 10)
            .await
            .unwrap();

        assert!(upstream.has_collection("events"));
        assert_eq!(
            upstream.calls(),
            vec![
                UpstreamCall::EnsureExists("events".into()),
                UpstreamCall::Subscribe("events".into()),
                UpstreamCall::Query("events".into()),
            ]
        );
    }
}

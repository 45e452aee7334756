//! Document and event builders.
//!
//! Fixture builders panic on malformed input; they are meant for tests.

use livereplica_core::{ChangeEvent, Document, DocumentId, ReplicaStore, UpdateDescription};
use livereplica_sync::MemoryUpstream;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Collection name used by fixtures.
pub const COLLECTION: &str = "events";

/// Sort key used by fixtures.
pub const SORT_KEY: &str = "createdAt";

/// Builds a document from a JSON object with an `_id` field.
pub fn doc(value: Value) -> Document {
    match Document::from_value(value, "_id") {
        Ok(document) => document,
        Err(err) => panic!("invalid fixture document: {err}"),
    }
}

/// Builds `{_id: id, createdAt: created_at}`.
pub fn stamped(id: u64, created_at: i64) -> Document {
    doc(json!({"_id": id, "createdAt": created_at}))
}

/// Builds `{_id: id, createdAt: created_at, ..fields}`.
pub fn stamped_with(id: u64, created_at: i64, fields: Value) -> Document {
    let mut body = Map::new();
    body.insert("_id".into(), json!(id));
    body.insert(SORT_KEY.into(), json!(created_at));
    if let Value::Object(extra) = fields {
        body.extend(extra);
    }
    Document::new(DocumentId::from(id), body)
}

/// Insert event for a stamped document.
pub fn insert(id: u64, created_at: i64) -> ChangeEvent {
    ChangeEvent::insert(stamped(id, created_at))
}

/// Delete event.
pub fn delete(id: u64) -> ChangeEvent {
    ChangeEvent::delete(id)
}

/// Replace event for a stamped document with extra fields.
pub fn replace(id: u64, created_at: i64, fields: Value) -> ChangeEvent {
    ChangeEvent::replace(stamped_with(id, created_at, fields))
}

/// Update event setting `updates` and removing `removed`.
pub fn update(id: u64, updates: Value, removed: &[&str]) -> ChangeEvent {
    let mut description = UpdateDescription::new();
    if let Value::Object(fields) = updates {
        for (path, value) in fields {
            description = description.set(path, value);
        }
    }
    for path in removed {
        description = description.unset(*path);
    }
    ChangeEvent::update(id, description)
}

/// An empty replica of the fixture collection.
pub fn empty_store() -> ReplicaStore {
    ReplicaStore::new(COLLECTION, SORT_KEY)
}

/// A replica holding `documents`.
pub fn store_with(documents: impl IntoIterator<Item = Document>) -> ReplicaStore {
    let mut store = empty_store();
    for document in documents {
        if let Err(err) = store.insert_sorted(document) {
            panic!("invalid fixture replica: {err}");
        }
    }
    store
}

/// The replica as JSON bodies in order.
pub fn bodies(store: &ReplicaStore) -> Vec<Value> {
    store.iter().map(Document::to_value).collect()
}

/// The replica's ids in order.
pub fn ids(store: &ReplicaStore) -> Vec<String> {
    store.iter().map(|d| d.id().to_string()).collect()
}

/// An upstream whose fixture collection holds `documents`.
pub fn seeded_upstream(documents: impl IntoIterator<Item = Document>) -> Arc<MemoryUpstream> {
    let upstream = Arc::new(MemoryUpstream::new());
    upstream.seed(COLLECTION, documents);
    upstream
}

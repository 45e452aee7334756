//! Benchmark utilities.

use livereplica_core::{ChangeEvent, Document, DocumentId, ReplicaStore, UpdateDescription};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Map, Value};

/// Collection used by every benchmark.
pub const COLLECTION: &str = "events";

/// Sort key used by every benchmark.
pub const SORT_KEY: &str = "createdAt";

/// Generate a document with a random sort key and a payload of `fields` fields.
pub fn random_document(id: u64, fields: usize) -> Document {
    let mut rng = rand::thread_rng();
    let mut body = Map::new();
    body.insert("_id".into(), json!(id));
    body.insert(SORT_KEY.into(), json!(rng.gen_range(0..1_000_000i64)));
    for i in 0..fields {
        body.insert(format!("field_{i}"), json!(rng.gen::<u32>()));
    }
    Document::new(DocumentId::from(id), body)
}

/// Generate `count` documents with distinct ids.
pub fn generate_documents(count: usize, fields: usize) -> Vec<Document> {
    (0..count as u64).map(|id| random_document(id, fields)).collect()
}

/// Build a store holding `count` documents.
pub fn populated_store(count: usize) -> ReplicaStore {
    let mut store = ReplicaStore::new(COLLECTION, SORT_KEY);
    for document in generate_documents(count, 4) {
        // ids are distinct
        let _ = store.insert_sorted(document);
    }
    store
}

/// Generate a mixed stream of `count` events against ids `0..live`.
///
/// Updates never touch the sort key. Ids past `live` are inserted fresh.
pub fn mixed_events(live: usize, count: usize) -> Vec<ChangeEvent> {
    let mut rng = rand::thread_rng();
    let mut next_id = live as u64;
    let mut ids: Vec<u64> = (0..live as u64).collect();
    let mut events = Vec::with_capacity(count);

    for _ in 0..count {
        let roll = rng.gen_range(0..10);
        let event = match (roll, ids.choose(&mut rng).copied()) {
            (0..=2, _) | (_, None) => {
                ids.push(next_id);
                next_id += 1;
                ChangeEvent::insert(random_document(next_id - 1, 4))
            }
            (3..=4, Some(id)) => {
                ids.retain(|live| *live != id);
                ChangeEvent::delete(id)
            }
            (_, Some(id)) => ChangeEvent::update(
                id,
                UpdateDescription::new()
                    .set("field_0", Value::from(rng.gen::<u32>()))
                    .set("meta.touched", Value::Bool(true)),
            ),
        };
        events.push(event);
    }
    events
}

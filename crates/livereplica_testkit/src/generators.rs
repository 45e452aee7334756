//! Property-based test generators using proptest.
//!
//! Random change streams are only useful if they could have come from a
//! real upstream. [`history_strategy`] therefore generates upstream writes
//! and replays them against a simulated collection, recording the change
//! events that collection would publish and the snapshot it would serve at
//! every point in time.
//!
//! A document's sort key is derived from its id: an id that is deleted and
//! inserted again comes back with the same key.

use crate::fixtures::{stamped_with, SORT_KEY};
use livereplica_core::{path, ChangeEvent, Document, DocumentId, UpdateDescription};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Paths an update may set. None of them ever holds a scalar parent.
const SET_PATHS: &[&str] = &["n", "title", "meta.views", "meta.flag"];

/// Paths an update may remove, including ones that never exist.
const UNSET_PATHS: &[&str] = &["title", "meta.flag", "meta", "missing.deep"];

/// A write made against the simulated upstream.
#[derive(Debug, Clone)]
pub enum UpstreamWrite {
    /// Insert a new document. Skipped if the id exists.
    Insert {
        /// Document ID.
        id: u64,
    },
    /// Delete the `pick`-th live document.
    Delete {
        /// Index into the live documents, modulo their count.
        pick: usize,
    },
    /// Replace the `pick`-th live document, keeping its sort key.
    Replace {
        /// Index into the live documents, modulo their count.
        pick: usize,
        /// New title.
        title: String,
    },
    /// Update the `pick`-th live document.
    Update {
        /// Index into the live documents, modulo their count.
        pick: usize,
        /// Field changes.
        description: UpdateDescription,
    },
}

/// Strategy for small document ids, so that collisions are common.
pub fn id_strategy() -> impl Strategy<Value = u64> {
    0u64..12
}

/// Sort key of a generated document. Ids share keys, producing ties.
pub fn created_at_for(id: u64) -> i64 {
    (id % 5) as i64
}

/// Strategy for update descriptions that leave the sort key alone.
pub fn update_description_strategy() -> impl Strategy<Value = UpdateDescription> {
    (
        prop::sample::subsequence(SET_PATHS.to_vec(), 0..=2),
        prop::sample::subsequence(UNSET_PATHS.to_vec(), 0..=2),
        any::<i32>(),
        prop::option::of(0usize..3),
    )
        .prop_map(|(set, unset, value, truncate)| {
            let mut description = UpdateDescription::new();
            for field in &set {
                description = description.set(*field, json!(value));
            }
            for field in unset {
                if !set.iter().any(|s| overlaps(s, field)) {
                    description = description.unset(field);
                }
            }
            if let Some(size) = truncate {
                description = description.truncate("tags", size);
            }
            description
        })
}

/// Strategy for one upstream write.
pub fn upstream_write_strategy() -> impl Strategy<Value = UpstreamWrite> {
    prop_oneof![
        4 => id_strategy().prop_map(|id| UpstreamWrite::Insert { id }),
        2 => any::<usize>().prop_map(|pick| UpstreamWrite::Delete { pick }),
        1 => (any::<usize>(), "[a-z]{1,6}")
            .prop_map(|(pick, title)| UpstreamWrite::Replace { pick, title }),
        3 => (any::<usize>(), update_description_strategy())
            .prop_map(|(pick, description)| UpstreamWrite::Update { pick, description }),
    ]
}

/// A replayable upstream history.
#[derive(Debug, Clone)]
pub struct History {
    /// Documents present before the first event.
    pub initial: Vec<Document>,
    /// Events published, in order.
    pub events: Vec<ChangeEvent>,
    /// `snapshots[k]` is the snapshot served after `k` events, sorted by
    /// the sort key, largest first.
    pub snapshots: Vec<Vec<Document>>,
}

impl History {
    /// The upstream's documents after every event.
    pub fn final_documents(&self) -> &[Document] {
        self.snapshots.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Strategy for histories of up to `max_writes` writes.
pub fn history_strategy(max_writes: usize) -> impl Strategy<Value = History> {
    (
        prop::collection::vec(id_strategy(), 0..6),
        prop::collection::vec(upstream_write_strategy(), 0..max_writes),
    )
        .prop_map(|(initial, writes)| simulate(initial, writes))
}

/// Replays writes against a simulated collection.
pub fn simulate(initial: Vec<u64>, writes: Vec<UpstreamWrite>) -> History {
    let mut live: Vec<Document> = Vec::new();
    for id in initial {
        if !live.iter().any(|d| d.id() == &DocumentId::from(id)) {
            live.push(new_document(id));
        }
    }

    let initial = live.clone();
    let mut events = Vec::new();
    let mut snapshots = vec![sorted_snapshot(&live)];

    for write in writes {
        let event = match write {
            UpstreamWrite::Insert { id } => {
                if live.iter().any(|d| d.id() == &DocumentId::from(id)) {
                    continue;
                }
                let document = new_document(id);
                live.push(document.clone());
                ChangeEvent::insert(document)
            }
            UpstreamWrite::Delete { pick } => {
                if live.is_empty() {
                    continue;
                }
                let removed = live.remove(pick % live.len());
                ChangeEvent::delete(removed.id().clone())
            }
            UpstreamWrite::Replace { pick, title } => {
                if live.is_empty() {
                    continue;
                }
                let index = pick % live.len();
                let current = &live[index];
                let mut body = current.body().clone();
                body.insert("title".into(), Value::String(title));
                body.shift_remove("meta");
                let document = Document::new(current.id().clone(), body);
                live[index] = document.clone();
                ChangeEvent::replace(document)
            }
            UpstreamWrite::Update { pick, description } => {
                if live.is_empty() {
                    continue;
                }
                let index = pick % live.len();
                let body = live[index].body_mut();
                let applied = path::apply_removed_fields(body, &description.removed_fields)
                    .and_then(|()| path::apply_truncated_arrays(body, &description.truncated_arrays))
                    .and_then(|()| path::apply_updated_fields(body, &description.updated_fields));
                if let Err(err) = applied {
                    panic!("generated update does not apply: {err}");
                }
                ChangeEvent::update(live[index].id().clone(), description)
            }
        };
        events.push(event);
        snapshots.push(sorted_snapshot(&live));
    }

    History {
        initial,
        events,
        snapshots,
    }
}

fn new_document(id: u64) -> Document {
    stamped_with(
        id,
        created_at_for(id),
        json!({"tags": ["a", "b", "c"], "meta": {"views": 0}}),
    )
}

fn sorted_snapshot(live: &[Document]) -> Vec<Document> {
    let mut snapshot = live.to_vec();
    snapshot.sort_by(|a, b| b.sort_key(SORT_KEY).cmp(&a.sort_key(SORT_KEY)));
    snapshot
}

fn overlaps(a: &str, b: &str) -> bool {
    a == b || a.starts_with(&format!("{b}.")) || b.starts_with(&format!("{a}."))
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

//! Replica invariant assertions.

use livereplica_core::{Document, ReplicaStore};
use std::collections::BTreeMap;

/// Panics if the replica's ordering or index is broken.
pub fn assert_invariants(store: &ReplicaStore) {
    if let Err(err) = store.check_invariants() {
        panic!("replica invariant broken: {err}");
    }
}

/// Returns true if both slices hold the same documents, in any order.
pub fn same_contents(a: &[Document], b: &[Document]) -> bool {
    by_id(a) == by_id(b)
}

/// Returns true if the sort keys of `documents` never increase.
pub fn is_sorted_descending(documents: &[Document], sort_key: &str) -> bool {
    documents
        .windows(2)
        .all(|pair| pair[0].sort_key(sort_key) >= pair[1].sort_key(sort_key))
}

fn by_id(documents: &[Document]) -> BTreeMap<&str, &Document> {
    documents.iter().map(|d| (d.id().as_str(), d)).collect()
}

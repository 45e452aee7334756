//! A deliberately naive replica used as a test oracle.

use livereplica_core::{
    path, ChangeEvent, CoreError, CoreResult, Document, DocumentId, ReplicaStore, SortKey,
};

/// Reference implementation of the replica transition rules.
///
/// Keeps documents in arrival order and sorts on every read, so ordering
/// and index bugs in [`ReplicaStore`] show up as differences.
#[derive(Debug, Clone)]
pub struct ReferenceReplica {
    sort_key: String,
    arrivals: Vec<Document>,
}

impl ReferenceReplica {
    /// Creates an empty reference replica.
    pub fn new(sort_key: impl Into<String>) -> Self {
        Self {
            sort_key: sort_key.into(),
            arrivals: Vec::new(),
        }
    }

    /// Loads documents as a snapshot would.
    pub fn load(&mut self, documents: impl IntoIterator<Item = Document>) {
        for document in documents {
            if !self.contains(document.id()) {
                self.arrivals.push(document);
            }
        }
    }

    /// Applies one event.
    pub fn apply(&mut self, event: ChangeEvent) -> CoreResult<()> {
        match event {
            ChangeEvent::Insert { document, .. } => {
                if !self.contains(document.id()) {
                    self.arrivals.push(document);
                }
            }
            ChangeEvent::Delete { id } => {
                self.arrivals.retain(|d| d.id() != &id);
            }
            ChangeEvent::Replace { id, document } => match self.find(&id) {
                None => self.arrivals.push(document),
                Some(index) => {
                    let current = self.arrivals[index].sort_key(&self.sort_key);
                    if current != document.sort_key(&self.sort_key) {
                        return Err(CoreError::integrity("reference", id.as_str(), "sort key changed"));
                    }
                    self.arrivals[index] = document;
                }
            },
            ChangeEvent::Update { id, description } => {
                let Some(index) = self.find(&id) else {
                    return Ok(());
                };
                let key = &self.sort_key;
                let nested = format!("{key}.");
                let on_key = |p: &str| p == key.as_str() || p.starts_with(&nested);
                let current = self.arrivals[index].sort_key(key);
                let violation = description.removed_fields.iter().any(|p| on_key(p))
                    || description.truncated_arrays.iter().any(|t| on_key(&t.field))
                    || description
                        .updated_fields
                        .iter()
                        .any(|(p, v)| on_key(p) && (p != key || SortKey::from_value(Some(v)) != current));
                if violation {
                    return Err(CoreError::integrity("reference", id.as_str(), "sort key changed"));
                }
                let body = self.arrivals[index].body_mut();
                path::apply_removed_fields(body, &description.removed_fields)?;
                path::apply_truncated_arrays(body, &description.truncated_arrays)?;
                path::apply_updated_fields(body, &description.updated_fields)?;
            }
            ChangeEvent::Invalidate => {}
        }
        Ok(())
    }

    /// Returns the documents in replica order.
    pub fn documents(&self) -> Vec<Document> {
        let mut sorted = self.arrivals.clone();
        sorted.sort_by(|a, b| b.sort_key(&self.sort_key).cmp(&a.sort_key(&self.sort_key)));
        sorted
    }

    /// Returns true if the replica and `store` hold the same documents in
    /// the same order.
    pub fn matches(&self, store: &ReplicaStore) -> bool {
        self.documents().as_slice() == store.documents()
    }

    fn contains(&self, id: &DocumentId) -> bool {
        self.find(id).is_some()
    }

    fn find(&self, id: &DocumentId) -> Option<usize> {
        self.arrivals.iter().position(|d| d.id() == id)
    }
}

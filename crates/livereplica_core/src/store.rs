//! Ordered document sequence with an id → position index.

use crate::document::{Document, DocumentId};
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;

/// The local replica of one collection.
///
/// Documents are kept sorted by their sort key, newest (largest) first.
/// Documents with equal keys stay in arrival order. The index maps every
/// document id to its current position and is updated on each insert and
/// removal.
///
/// # Example
///
/// ```rust
/// use livereplica_core::{Document, ReplicaStore};
/// use serde_json::json;
///
/// let mut store = ReplicaStore::new("events", "createdAt");
/// let old = Document::from_value(json!({"_id": 1, "createdAt": 10}), "_id").unwrap();
/// let new = Document::from_value(json!({"_id": 2, "createdAt": 20}), "_id").unwrap();
///
/// store.insert_sorted(old).unwrap();
/// assert_eq!(store.insert_sorted(new).unwrap(), 0);
/// assert_eq!(store.position_of(&"1".into()), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct ReplicaStore {
    collection: String,
    sort_key: String,
    sequence: Vec<Document>,
    index: HashMap<DocumentId, usize>,
}

impl ReplicaStore {
    /// Creates an empty replica for `collection`, ordered by `sort_key`.
    pub fn new(collection: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            sort_key: sort_key.into(),
            sequence: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the sort key field.
    pub fn sort_key(&self) -> &str {
        &self.sort_key
    }

    /// Returns the number of documents.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Returns true if the replica holds no documents.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Returns the documents in replica order.
    pub fn documents(&self) -> &[Document] {
        &self.sequence
    }

    /// Iterates over the documents in replica order.
    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.sequence.iter()
    }

    /// Returns the document at a position.
    pub fn get(&self, position: usize) -> Option<&Document> {
        self.sequence.get(position)
    }

    /// Returns true if a document with this id is present.
    pub fn has(&self, id: &DocumentId) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the position of a document.
    pub fn position_of(&self, id: &DocumentId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Returns a document by id.
    pub fn get_by_id(&self, id: &DocumentId) -> Option<&Document> {
        self.index.get(id).map(|&position| &self.sequence[position])
    }

    /// Returns a document by id for in-place edits that keep its sort key.
    pub(crate) fn get_by_id_mut(&mut self, id: &DocumentId) -> Option<(usize, &mut Document)> {
        let position = *self.index.get(id)?;
        Some((position, &mut self.sequence[position]))
    }

    /// Inserts a document at its sorted position and returns that position.
    ///
    /// The document goes before the first document with a strictly smaller
    /// sort key, so it lands after all documents with an equal key.
    pub fn insert_sorted(&mut self, document: Document) -> CoreResult<usize> {
        if self.index.contains_key(document.id()) {
            return Err(CoreError::DuplicateId {
                id: document.id().to_string(),
            });
        }

        let key = document.sort_key(&self.sort_key);
        let position = self
            .sequence
            .partition_point(|existing| existing.sort_key(&self.sort_key) >= key);

        self.index.insert(document.id().clone(), position);
        self.sequence.insert(position, document);
        self.reindex_from(position + 1);
        Ok(position)
    }

    /// Removes a document by id, returning its former position and body.
    ///
    /// Unknown ids are a no-op.
    pub fn remove_by_id(&mut self, id: &DocumentId) -> Option<(usize, Document)> {
        let position = self.index.remove(id)?;
        let document = self.sequence.remove(position);
        self.reindex_from(position);
        Some((position, document))
    }

    /// Replaces a document in place and returns its position.
    ///
    /// Returns `Ok(None)` if the id is unknown. The replacement must carry
    /// a sort key that orders equal to the stored one.
    pub fn replace_by_id(
        &mut self,
        id: &DocumentId,
        document: Document,
    ) -> CoreResult<Option<usize>> {
        let Some(&position) = self.index.get(id) else {
            return Ok(None);
        };

        let current = &self.sequence[position];
        if current.sort_key(&self.sort_key) != document.sort_key(&self.sort_key) {
            let before = current.get(&self.sort_key);
            let after = document.get(&self.sort_key);
            return Err(CoreError::integrity(
                &self.collection,
                id.as_str(),
                format!(
                    "'{}' changed from '{}' to '{}'",
                    self.sort_key,
                    display_field(before),
                    display_field(after)
                ),
            ));
        }

        self.sequence[position] = document;
        Ok(Some(position))
    }

    /// Removes every document.
    pub fn clear(&mut self) {
        self.sequence.clear();
        self.index.clear();
    }

    /// Verifies ordering and index consistency.
    ///
    /// This walks the whole replica; use it in tests and diagnostics.
    pub fn check_invariants(&self) -> CoreResult<()> {
        if self.index.len() != self.sequence.len() {
            return Err(CoreError::Corrupted {
                message: format!(
                    "index holds {} ids for {} documents",
                    self.index.len(),
                    self.sequence.len()
                ),
            });
        }

        for (position, document) in self.sequence.iter().enumerate() {
            if self.index.get(document.id()) != Some(&position) {
                return Err(CoreError::Corrupted {
                    message: format!(
                        "document '{}' at position {position} is indexed at {:?}",
                        document.id(),
                        self.index.get(document.id())
                    ),
                });
            }
        }

        for (position, pair) in self.sequence.windows(2).enumerate() {
            if pair[0].sort_key(&self.sort_key) < pair[1].sort_key(&self.sort_key) {
                return Err(CoreError::Corrupted {
                    message: format!(
                        "documents at {position} and {} are out of order",
                        position + 1
                    ),
                });
            }
        }

        Ok(())
    }

    fn reindex_from(&mut self, start: usize) {
        for position in start..self.sequence.len() {
            if let Some(slot) = self.index.get_mut(self.sequence[position].id()) {
                *slot = position;
            }
        }
    }
}

pub(crate) fn display_field(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "<missing>".to_string(),
    }
}

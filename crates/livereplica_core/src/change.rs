//! Change events delivered by the upstream feed.

use crate::document::{Document, DocumentId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A document was inserted.
    Insert,
    /// A document was deleted.
    Delete,
    /// A document was replaced as a whole.
    Replace,
    /// Some fields of a document changed.
    Update,
    /// The feed is no longer valid.
    Invalidate,
}

impl ChangeKind {
    /// Returns the operation name used by change streams.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Delete => "delete",
            ChangeKind::Replace => "replace",
            ChangeKind::Update => "update",
            ChangeKind::Invalidate => "invalidate",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An array shortened by an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncatedArray {
    /// Dotted path of the array.
    pub field: String,
    /// Length after truncation.
    pub new_size: usize,
}

/// Field-level description of a partial update.
///
/// Paths within one description are disjoint, so the order in which they
/// are applied does not change the result. They are still applied in the
/// order given: removed fields, truncated arrays, updated fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
    /// New values by dotted path.
    #[serde(default)]
    pub updated_fields: Map<String, Value>,
    /// Dotted paths that were removed.
    #[serde(default)]
    pub removed_fields: Vec<String>,
    /// Arrays that were truncated.
    #[serde(default)]
    pub truncated_arrays: Vec<TruncatedArray>,
}

impl UpdateDescription {
    /// Creates an empty description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an updated field.
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.updated_fields.insert(path.into(), value);
        self
    }

    /// Adds a removed field.
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.removed_fields.push(path.into());
        self
    }

    /// Adds a truncated array.
    pub fn truncate(mut self, path: impl Into<String>, new_size: usize) -> Self {
        self.truncated_arrays.push(TruncatedArray {
            field: path.into(),
            new_size,
        });
        self
    }

    /// Returns true if the description changes nothing.
    pub fn is_empty(&self) -> bool {
        self.updated_fields.is_empty()
            && self.removed_fields.is_empty()
            && self.truncated_arrays.is_empty()
    }

    /// Iterates over every path the description touches.
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        self.removed_fields
            .iter()
            .map(String::as_str)
            .chain(self.truncated_arrays.iter().map(|t| t.field.as_str()))
            .chain(self.updated_fields.keys().map(String::as_str))
    }
}

/// A single change notification about one document of a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A document was inserted.
    Insert {
        /// Target document.
        id: DocumentId,
        /// Full document body.
        document: Document,
    },
    /// A document was deleted.
    Delete {
        /// Target document.
        id: DocumentId,
    },
    /// A document was replaced as a whole.
    Replace {
        /// Target document.
        id: DocumentId,
        /// Full replacement body.
        document: Document,
    },
    /// Some fields of a document changed.
    Update {
        /// Target document.
        id: DocumentId,
        /// What changed.
        description: UpdateDescription,
    },
    /// The feed is no longer valid; nothing after this can be trusted.
    Invalidate,
}

impl ChangeEvent {
    /// Creates an insert event for a document.
    pub fn insert(document: Document) -> Self {
        Self::Insert {
            id: document.id().clone(),
            document,
        }
    }

    /// Creates a delete event.
    pub fn delete(id: impl Into<DocumentId>) -> Self {
        Self::Delete { id: id.into() }
    }

    /// Creates a replace event for a document.
    pub fn replace(document: Document) -> Self {
        Self::Replace {
            id: document.id().clone(),
            document,
        }
    }

    /// Creates an update event.
    pub fn update(id: impl Into<DocumentId>, description: UpdateDescription) -> Self {
        Self::Update {
            id: id.into(),
            description,
        }
    }

    /// Returns the event kind.
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
            ChangeEvent::Replace { .. } => ChangeKind::Replace,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Invalidate => ChangeKind::Invalidate,
        }
    }

    /// Returns the target document, if the event has one.
    pub fn id(&self) -> Option<&DocumentId> {
        match self {
            ChangeEvent::Insert { id, .. }
            | ChangeEvent::Delete { id }
            | ChangeEvent::Replace { id, .. }
            | ChangeEvent::Update { id, .. } => Some(id),
            ChangeEvent::Invalidate => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_take_id_from_document() {
        let doc = Document::from_value(json!({"_id": "a", "createdAt": 1}), "_id").unwrap();
        let event = ChangeEvent::insert(doc.clone());
        assert_eq!(event.kind(), ChangeKind::Insert);
        assert_eq!(event.id(), Some(&DocumentId::new("a")));

        let event = ChangeEvent::replace(doc);
        assert_eq!(event.kind(), ChangeKind::Replace);

        assert_eq!(ChangeEvent::Invalidate.id(), None);
        assert_eq!(ChangeEvent::delete("b").kind().to_string(), "delete");
    }

    #[test]
    fn update_description_builder() {
        let description = UpdateDescription::new()
            .set("a.b", json!(1))
            .unset("c")
            .truncate("list", 2);

        assert!(!description.is_empty());
        assert_eq!(
            description.touched_paths().collect::<Vec<_>>(),
            vec!["c", "list", "a.b"]
        );
        assert!(UpdateDescription::new().is_empty());
    }

    #[test]
    fn update_description_from_change_stream_json() {
        let description: UpdateDescription = serde_json::from_value(json!({
            "updatedFields": {"title": "x", "meta.views": 3},
            "removedFields": ["draft"],
            "truncatedArrays": [{"field": "tags", "newSize": 1}]
        }))
        .unwrap();

        assert_eq!(description.updated_fields.len(), 2);
        assert_eq!(description.removed_fields, vec!["draft".to_string()]);
        assert_eq!(description.truncated_arrays[0].new_size, 1);

        let minimal: UpdateDescription = serde_json::from_value(json!({})).unwrap();
        assert!(minimal.is_empty());
    }
}

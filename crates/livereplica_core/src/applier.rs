//! Applies one change event to a replica.

use crate::change::{ChangeEvent, ChangeKind, UpdateDescription};
use crate::document::{Document, DocumentId, SortKey};
use crate::error::{CoreError, CoreResult};
use crate::path::{self, FieldPath};
use crate::store::{display_field, ReplicaStore};
use tracing::debug;

/// Why an event left the replica unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Insert for a document we already hold; our copy is at least as new.
    AlreadyPresent,
    /// Delete or update for a document we do not hold.
    NotPresent,
}

/// What applying an event did to the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A document was inserted at `position`.
    Inserted {
        /// Document ID.
        id: DocumentId,
        /// Position after insertion.
        position: usize,
    },
    /// A document was removed from `position`.
    Removed {
        /// Document ID.
        id: DocumentId,
        /// Position before removal.
        position: usize,
    },
    /// A document was replaced at `position`.
    Replaced {
        /// Document ID.
        id: DocumentId,
        /// Unchanged position.
        position: usize,
    },
    /// Fields of the document at `position` changed.
    Updated {
        /// Document ID.
        id: DocumentId,
        /// Unchanged position.
        position: usize,
    },
    /// The event was a known race and changed nothing.
    Skipped {
        /// Document ID.
        id: DocumentId,
        /// Kind of the skipped event.
        kind: ChangeKind,
        /// Why it was skipped.
        reason: SkipReason,
    },
    /// The feed reported that it is no longer valid.
    Invalidated,
}

impl ApplyOutcome {
    /// Returns true if the replica changed.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            ApplyOutcome::Skipped { .. } | ApplyOutcome::Invalidated
        )
    }
}

/// State transition from one change event to the next replica state.
///
/// | Event      | Absent id                 | Present id                        |
/// |------------|---------------------------|-----------------------------------|
/// | Insert     | insert at sorted position | skip                              |
/// | Delete     | skip                      | remove                            |
/// | Replace    | applied as an insert      | replace in place, same sort key   |
/// | Update     | skip                      | edit fields in place, same key    |
/// | Invalidate | reported to the caller    |                                   |
///
/// Changing or removing the sort key of a held document is an integrity
/// violation; the replica is left untouched and the error is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeApplier;

impl ChangeApplier {
    /// Creates an applier.
    pub fn new() -> Self {
        Self
    }

    /// Applies `event` to `store`.
    pub fn apply(&self, store: &mut ReplicaStore, event: ChangeEvent) -> CoreResult<ApplyOutcome> {
        match event {
            ChangeEvent::Insert { id, document } => self.insert(store, id, document),
            ChangeEvent::Delete { id } => Ok(match store.remove_by_id(&id) {
                Some((position, _)) => ApplyOutcome::Removed { id, position },
                None => {
                    debug!(collection = store.collection(), %id, "delete for absent document skipped");
                    ApplyOutcome::Skipped {
                        id,
                        kind: ChangeKind::Delete,
                        reason: SkipReason::NotPresent,
                    }
                }
            }),
            ChangeEvent::Replace { id, document } => {
                if !store.has(&id) {
                    debug!(collection = store.collection(), %id, "replace for absent document applied as insert");
                    return self.apply(store, ChangeEvent::Insert { id, document });
                }
                let document = with_id(id.clone(), document);
                match store.replace_by_id(&id, document)? {
                    Some(position) => Ok(ApplyOutcome::Replaced { id, position }),
                    None => Err(CoreError::Corrupted {
                        message: format!("document '{id}' vanished during replace"),
                    }),
                }
            }
            ChangeEvent::Update { id, description } => self.update(store, id, &description),
            ChangeEvent::Invalidate => Ok(ApplyOutcome::Invalidated),
        }
    }

    fn insert(
        &self,
        store: &mut ReplicaStore,
        id: DocumentId,
        document: Document,
    ) -> CoreResult<ApplyOutcome> {
        if store.has(&id) {
            debug!(collection = store.collection(), %id, "insert for present document skipped");
            return Ok(ApplyOutcome::Skipped {
                id,
                kind: ChangeKind::Insert,
                reason: SkipReason::AlreadyPresent,
            });
        }
        let position = store.insert_sorted(with_id(id.clone(), document))?;
        Ok(ApplyOutcome::Inserted { id, position })
    }

    fn update(
        &self,
        store: &mut ReplicaStore,
        id: DocumentId,
        description: &UpdateDescription,
    ) -> CoreResult<ApplyOutcome> {
        let collection = store.collection().to_string();
        let sort_key = store.sort_key().to_string();

        let Some((position, document)) = store.get_by_id_mut(&id) else {
            debug!(collection = %collection, %id, "update for absent document skipped");
            return Ok(ApplyOutcome::Skipped {
                id,
                kind: ChangeKind::Update,
                reason: SkipReason::NotPresent,
            });
        };

        check_sort_key_untouched(&collection, &sort_key, document, description)?;

        let body = document.body_mut();
        path::apply_removed_fields(body, &description.removed_fields)?;
        path::apply_truncated_arrays(body, &description.truncated_arrays)?;
        path::apply_updated_fields(body, &description.updated_fields)?;

        Ok(ApplyOutcome::Updated { id, position })
    }
}

/// Rejects an update that would remove or change the sort key.
fn check_sort_key_untouched(
    collection: &str,
    sort_key: &str,
    document: &Document,
    description: &UpdateDescription,
) -> CoreResult<()> {
    let violation = |message: String| CoreError::integrity(collection, document.id().as_str(), message);

    for field in &description.removed_fields {
        if FieldPath::parse(field)?.root() == sort_key {
            return Err(violation(format!("'{sort_key}' field removed")));
        }
    }

    for array in &description.truncated_arrays {
        if FieldPath::parse(&array.field)?.root() == sort_key {
            return Err(violation(format!("'{sort_key}' field truncated")));
        }
    }

    for (field, value) in &description.updated_fields {
        let path = FieldPath::parse(field)?;
        if path.root() != sort_key {
            continue;
        }
        let current = document.get(sort_key);
        if path.depth() > 1 || document.sort_key(sort_key) != SortKey::from_value(Some(value)) {
            return Err(violation(format!(
                "'{sort_key}' changed from '{}' to '{}' at '{field}'",
                display_field(current),
                value
            )));
        }
    }

    Ok(())
}

fn with_id(id: DocumentId, document: Document) -> Document {
    if document.id() == &id {
        document
    } else {
        Document::new(id, document.into_body())
    }
}

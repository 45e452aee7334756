//! Decoding of change-stream documents.

use crate::change::{ChangeEvent, UpdateDescription};
use crate::document::{Document, DocumentId};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One change-stream document as delivered over the wire.
///
/// ```json
/// {
///   "_id": {"_data": "8263..."},
///   "operationType": "update",
///   "documentKey": {"_id": 4},
///   "updateDescription": {"updatedFields": {"a.c": 2}, "removedFields": []}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChange {
    /// Opaque resume token.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<Value>,
    /// Operation name, e.g. `insert` or `update`.
    pub operation_type: String,
    /// Key of the target document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_key: Option<Map<String, Value>>,
    /// Full document for inserts and replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Map<String, Value>>,
    /// Field changes for updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_description: Option<UpdateDescription>,
}

impl RawChange {
    /// Parses a change-stream document.
    pub fn from_json(value: Value) -> CoreResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Converts to a [`ChangeEvent`].
    ///
    /// Operations the replica has no use for (`drop`, `rename`,
    /// `dropDatabase` and anything unknown) yield `Ok(None)`.
    pub fn into_event(self, id_field: &str) -> CoreResult<Option<ChangeEvent>> {
        let event = match self.operation_type.as_str() {
            "insert" => {
                let document = full_document(self.full_document, id_field, "insert")?;
                ChangeEvent::insert(document)
            }
            "replace" => {
                let document = full_document(self.full_document, id_field, "replace")?;
                ChangeEvent::replace(document)
            }
            "delete" => ChangeEvent::Delete {
                id: key_id(self.document_key.as_ref(), id_field, "delete")?,
            },
            "update" => {
                let id = key_id(self.document_key.as_ref(), id_field, "update")?;
                let description = self.update_description.ok_or_else(|| {
                    CoreError::decode("update change without updateDescription")
                })?;
                ChangeEvent::update(id, description)
            }
            "invalidate" => ChangeEvent::Invalidate,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn full_document(
    body: Option<Map<String, Value>>,
    id_field: &str,
    operation: &str,
) -> CoreResult<Document> {
    let body = body.ok_or_else(|| {
        CoreError::decode(format!("{operation} change without fullDocument"))
    })?;
    Document::from_map(body, id_field)
}

fn key_id(
    key: Option<&Map<String, Value>>,
    id_field: &str,
    operation: &str,
) -> CoreResult<DocumentId> {
    key.and_then(|key| key.get(id_field))
        .map(DocumentId::from_value)
        .ok_or_else(|| CoreError::decode(format!("{operation} change without documentKey.{id_field}")))
}

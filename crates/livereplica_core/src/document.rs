//! Documents, document identifiers and sort keys.

use crate::error::{CoreError, CoreResult};
use chrono::DateTime;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a replicated document.
///
/// Holds the string form of the upstream id: strings verbatim, numbers in
/// decimal, `{"$oid": "..."}` as the hex string, anything else as compact
/// JSON.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates an ID from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives an ID from an upstream id value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self(s.clone()),
            Value::Number(n) => Self(n.to_string()),
            Value::Object(map) => match map.get("$oid") {
                Some(Value::String(oid)) if map.len() == 1 => Self(oid.clone()),
                _ => Self(value.to_string()),
            },
            other => Self(other.to_string()),
        }
    }

    /// Returns the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for DocumentId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// A replicated document: its id plus the full body, id field included.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    body: Map<String, Value>,
}

impl Document {
    /// Creates a document from an id and a body.
    pub fn new(id: DocumentId, body: Map<String, Value>) -> Self {
        Self { id, body }
    }

    /// Creates a document from a JSON object, reading the id from `id_field`.
    pub fn from_value(value: Value, id_field: &str) -> CoreResult<Self> {
        match value {
            Value::Object(body) => Self::from_map(body, id_field),
            other => Err(CoreError::InvalidDocument {
                message: format!("expected an object, got {other}"),
            }),
        }
    }

    /// Creates a document from a JSON map, reading the id from `id_field`.
    pub fn from_map(body: Map<String, Value>, id_field: &str) -> CoreResult<Self> {
        let id = body
            .get(id_field)
            .map(DocumentId::from_value)
            .ok_or_else(|| CoreError::MissingId {
                field: id_field.to_string(),
            })?;
        Ok(Self { id, body })
    }

    /// Returns the document ID.
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Returns the document body.
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Returns the document body for in-place edits.
    pub fn body_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.body
    }

    /// Returns a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Returns the value at a dotted path, if present.
    ///
    /// Numeric segments index into arrays.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.body.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns the sort key stored under `field`.
    pub fn sort_key(&self, field: &str) -> SortKey {
        SortKey::from_value(self.body.get(field))
    }

    /// Consumes the document and returns its body.
    pub fn into_body(self) -> Map<String, Value> {
        self.body
    }

    /// Returns the body as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

/// Orderable form of a sort-key value.
///
/// Values of different types order by type, following the upstream
/// database: missing/null, numbers, strings, objects, arrays, booleans,
/// dates. `{"$date": ...}` is a date, given either as epoch milliseconds
/// (plain or `{"$numberLong": "..."}`) or as RFC 3339 text. Dates order by
/// instant whatever their encoding. Date text that does not parse sorts
/// after every valid date, by its raw text.
#[derive(Debug, Clone)]
pub enum SortKey {
    /// Missing field or explicit null.
    Null,
    /// Any JSON number.
    Number(f64),
    /// A string.
    Text(String),
    /// An object, compared by its compact JSON.
    Object(String),
    /// An array, compared by its compact JSON.
    Array(String),
    /// A boolean.
    Bool(bool),
    /// A date as milliseconds since the epoch.
    Date(f64),
    /// A `$date` whose value could not be read as an instant.
    UnparsedDate(String),
}

impl SortKey {
    /// Builds a sort key from an optional field value.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => SortKey::Null,
            Some(Value::Number(n)) => SortKey::Number(normalize(n.as_f64().unwrap_or(0.0))),
            Some(Value::String(s)) => SortKey::Text(s.clone()),
            Some(Value::Bool(b)) => SortKey::Bool(*b),
            Some(array @ Value::Array(_)) => SortKey::Array(array.to_string()),
            Some(object @ Value::Object(map)) => match map.get("$date") {
                Some(date) if map.len() == 1 => Self::from_date(date),
                _ => SortKey::Object(object.to_string()),
            },
        }
    }

    fn from_date(date: &Value) -> Self {
        let millis = match date {
            Value::Number(n) => n.as_f64(),
            Value::String(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|instant| instant.timestamp_millis() as f64),
            Value::Object(inner) if inner.len() == 1 => match inner.get("$numberLong") {
                Some(Value::String(millis)) => millis.parse::<i64>().ok().map(|m| m as f64),
                _ => None,
            },
            _ => None,
        };

        match millis {
            Some(millis) => SortKey::Date(normalize(millis)),
            None => match date {
                Value::String(text) => SortKey::UnparsedDate(text.clone()),
                other => SortKey::UnparsedDate(other.to_string()),
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Null => 0,
            SortKey::Number(_) => 1,
            SortKey::Text(_) => 2,
            SortKey::Object(_) => 3,
            SortKey::Array(_) => 4,
            SortKey::Bool(_) => 5,
            SortKey::Date(_) => 6,
            SortKey::UnparsedDate(_) => 7,
        }
    }
}

/// Folds `-0.0` into `0.0`; upstream compares them as equal.
fn normalize(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) | (SortKey::Date(a), SortKey::Date(b)) => {
                a.total_cmp(b)
            }
            (SortKey::Text(a), SortKey::Text(b))
            | (SortKey::Object(a), SortKey::Object(b))
            | (SortKey::Array(a), SortKey::Array(b))
            | (SortKey::UnparsedDate(a), SortKey::UnparsedDate(b)) => a.cmp(b),
            (SortKey::Bool(a), SortKey::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_from_value() {
        assert_eq!(DocumentId::from_value(&json!("abc")).as_str(), "abc");
        assert_eq!(DocumentId::from_value(&json!(42)).as_str(), "42");
        assert_eq!(
            DocumentId::from_value(&json!({"$oid": "5f1d7a"})).as_str(),
            "5f1d7a"
        );
        assert_eq!(
            DocumentId::from_value(&json!({"a": 1})).as_str(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn document_requires_id() {
        let err = Document::from_value(json!({"createdAt": 1}), "_id").unwrap_err();
        assert_eq!(
            err,
            CoreError::MissingId {
                field: "_id".into()
            }
        );

        let err = Document::from_value(json!([1, 2]), "_id").unwrap_err();
        assert!(matches!(err, CoreError::InvalidDocument { .. }));
    }

    #[test]
    fn get_path_walks_objects_and_arrays() {
        let doc = Document::from_value(
            json!({"_id": 1, "a": {"b": [10, {"c": "x"}]}}),
            "_id",
        )
        .unwrap();

        assert_eq!(doc.get_path("a.b.0"), Some(&json!(10)));
        assert_eq!(doc.get_path("a.b.1.c"), Some(&json!("x")));
        assert_eq!(doc.get_path("a.b.2"), None);
        assert_eq!(doc.get_path("a.z"), None);
    }

    #[test]
    fn sort_key_type_order() {
        let null = SortKey::from_value(None);
        let number = SortKey::from_value(Some(&json!(5)));
        let text = SortKey::from_value(Some(&json!("2024-01-01")));
        let date = SortKey::from_value(Some(&json!({"$date": 1_700_000_000_000i64})));

        assert!(null < number);
        assert!(number < text);
        assert!(text < date);
        assert_eq!(null, SortKey::from_value(Some(&Value::Null)));
    }

    #[test]
    fn sort_key_numeric_order() {
        let small = SortKey::from_value(Some(&json!(2)));
        let large = SortKey::from_value(Some(&json!(10.5)));
        assert!(small < large);
        assert_eq!(
            SortKey::from_value(Some(&json!(3))),
            SortKey::from_value(Some(&json!(3.0)))
        );
    }

    fn date(value: Value) -> SortKey {
        SortKey::from_value(Some(&json!({ "$date": value })))
    }

    #[test]
    fn dates_order_by_instant() {
        let whole = date(json!("2024-01-01T00:00:00Z"));
        let fraction = date(json!("2024-01-01T00:00:00.500Z"));
        assert!(whole < fraction);

        // 00:30 at +01:00 is 23:30 the previous day in UTC
        let offset = date(json!("2024-01-01T00:30:00+01:00"));
        let utc = date(json!("2023-12-31T23:45:00Z"));
        assert!(offset < utc);

        assert_eq!(date(json!("2024-01-01T00:00:00Z")), date(json!(1_704_067_200_000i64)));
    }

    #[test]
    fn text_and_millis_dates_mix() {
        let text_1960 = date(json!("1960-06-01T00:00:00Z"));
        let millis_1970 = date(json!(0));
        let text_2000 = date(json!("2000-01-01T00:00:00.000Z"));
        let long_2030 = date(json!({"$numberLong": "1893456000000"}));

        assert!(text_1960 < millis_1970);
        assert!(millis_1970 < text_2000);
        assert!(text_2000 < long_2030);
    }

    #[test]
    fn unparsed_dates_sort_after_valid_ones() {
        let garbage = date(json!("not a date"));
        let valid = date(json!("2999-01-01T00:00:00Z"));
        assert!(matches!(garbage, SortKey::UnparsedDate(_)));
        assert!(valid < garbage);
        assert!(date(json!("a")) < date(json!("b")));
    }

    #[test]
    fn negative_zero_equals_zero() {
        assert_eq!(
            SortKey::from_value(Some(&json!(-0.0))),
            SortKey::from_value(Some(&json!(0)))
        );
        assert_eq!(date(json!(-0.0)), date(json!(0)));
        assert!(SortKey::from_value(Some(&json!(-1))) < SortKey::from_value(Some(&json!(-0.0))));
    }

    #[test]
    fn date_number_long() {
        let a = SortKey::from_value(Some(&json!({"$date": {"$numberLong": "100"}})));
        let b = SortKey::from_value(Some(&json!({"$date": 200})));
        assert!(a < b);
    }

    #[test]
    fn serializes_as_body() {
        let doc = Document::from_value(json!({"_id": "x", "n": 1}), "_id").unwrap();
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"_id": "x", "n": 1}));
    }
}

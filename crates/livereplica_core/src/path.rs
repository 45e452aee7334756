//! Dotted-path edits on document bodies.
//!
//! Partial updates describe their changes as dotted paths (`"a.b.0.c"`).
//! The functions here walk a path one segment at a time, descending through
//! objects by key and through arrays by numeric index, without recursion.
//!
//! - [`set`] creates missing intermediate objects on the way down.
//! - [`remove`] treats a missing segment as already removed, so
//!   redelivered removals are harmless.
//! - [`truncate`] shortens an array in place.

use crate::change::TruncatedArray;
use crate::error::{CoreError, CoreResult};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A parsed dotted path with at least one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    parents: Vec<String>,
    leaf: String,
}

impl FieldPath {
    /// Parses a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(path: &str) -> CoreResult<Self> {
        if path.is_empty() {
            return Err(CoreError::InvalidPath {
                path: String::new(),
                reason: "path is empty".into(),
            });
        }

        let mut segments: Vec<String> = Vec::new();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(CoreError::InvalidPath {
                    path: path.to_string(),
                    reason: "path contains an empty segment".into(),
                });
            }
            segments.push(segment.to_string());
        }

        let leaf = segments.pop().unwrap_or_default();
        Ok(Self {
            raw: path.to_string(),
            parents: segments,
            leaf,
        })
    }

    /// Returns the path as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the first segment (the top-level field).
    pub fn root(&self) -> &str {
        self.parents.first().unwrap_or(&self.leaf)
    }

    /// Returns the number of segments.
    pub fn depth(&self) -> usize {
        self.parents.len() + 1
    }

    /// Iterates over all segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.parents
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.leaf.as_str()))
    }
}

impl FromStr for FieldPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A container reached while walking a path.
enum Slot<'a> {
    Object(&'a mut Map<String, Value>),
    Array(&'a mut Vec<Value>),
}

impl<'a> Slot<'a> {
    fn of(value: &'a mut Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Slot::Object(map)),
            Value::Array(items) => Some(Slot::Array(items)),
            _ => None,
        }
    }

    fn child(self, segment: &str) -> Option<&'a mut Value> {
        match self {
            Slot::Object(map) => map.get_mut(segment),
            Slot::Array(items) => match segment.parse::<usize>() {
                Ok(index) => items.get_mut(index),
                Err(_) => None,
            },
        }
    }

    fn child_or_create(self, segment: &str, path: &FieldPath) -> CoreResult<&'a mut Value> {
        match self {
            Slot::Object(map) => Ok(map
                .entry(segment)
                .or_insert_with(|| Value::Object(Map::new()))),
            Slot::Array(items) => {
                let index = array_index(segment, path)?;
                if index >= items.len() {
                    pad(items, index, path)?;
                    items.push(Value::Object(Map::new()));
                }
                Ok(&mut items[index])
            }
        }
    }

    fn assign(self, segment: &str, value: Value, path: &FieldPath) -> CoreResult<()> {
        match self {
            Slot::Object(map) => {
                map.insert(segment.to_string(), value);
            }
            Slot::Array(items) => {
                let index = array_index(segment, path)?;
                if index < items.len() {
                    items[index] = value;
                } else {
                    pad(items, index, path)?;
                    items.push(value);
                }
            }
        }
        Ok(())
    }

    fn delete(self, segment: &str) -> bool {
        match self {
            Slot::Object(map) => map.shift_remove(segment).is_some(),
            Slot::Array(items) => match segment.parse::<usize>() {
                Ok(index) if index < items.len() => {
                    items.remove(index);
                    true
                }
                _ => false,
            },
        }
    }
}

/// Most nulls an array may be padded with to reach an index. Upstream
/// rejects updates that need more.
pub const MAX_ARRAY_PADDING: usize = 1_500_000;

/// Fills `items` with nulls up to `index`.
fn pad(items: &mut Vec<Value>, index: usize, path: &FieldPath) -> CoreResult<()> {
    let padding = index - items.len();
    if padding > MAX_ARRAY_PADDING {
        return Err(CoreError::path_conflict(
            path.as_str(),
            format!("index {index} needs {padding} padding elements, more than {MAX_ARRAY_PADDING}"),
        ));
    }
    items.resize(index, Value::Null);
    Ok(())
}

fn array_index(segment: &str, path: &FieldPath) -> CoreResult<usize> {
    segment.parse::<usize>().map_err(|_| {
        CoreError::path_conflict(
            path.as_str(),
            format!("segment '{segment}' addresses an array but is not an index"),
        )
    })
}

fn not_a_container(path: &FieldPath, segment: &str) -> CoreError {
    CoreError::path_conflict(
        path.as_str(),
        format!("'{segment}' holds neither an object nor an array"),
    )
}

/// Assigns `value` at `path`, creating empty objects for missing parents.
pub fn set(target: &mut Map<String, Value>, path: &FieldPath, value: Value) -> CoreResult<()> {
    let mut slot = Slot::Object(target);
    for segment in &path.parents {
        let child = slot.child_or_create(segment, path)?;
        slot = Slot::of(child).ok_or_else(|| not_a_container(path, segment))?;
    }
    slot.assign(&path.leaf, value, path)
}

/// Removes the value at `path`.
///
/// Returns `false` without touching the target when any segment is already
/// absent.
pub fn remove(target: &mut Map<String, Value>, path: &FieldPath) -> bool {
    let mut slot = Slot::Object(target);
    for segment in &path.parents {
        let Some(next) = slot.child(segment).and_then(Slot::of) else {
            return false;
        };
        slot = next;
    }
    slot.delete(&path.leaf)
}

/// Truncates the array at `path` to `new_size` elements.
///
/// A missing path is a no-op; a non-array value is a conflict.
pub fn truncate(target: &mut Map<String, Value>, path: &FieldPath, new_size: usize) -> CoreResult<()> {
    let mut slot = Slot::Object(target);
    for segment in &path.parents {
        let Some(next) = slot.child(segment).and_then(Slot::of) else {
            return Ok(());
        };
        slot = next;
    }
    match slot.child(&path.leaf) {
        None => Ok(()),
        Some(Value::Array(items)) => {
            items.truncate(new_size);
            Ok(())
        }
        Some(_) => Err(CoreError::path_conflict(path.as_str(), "value is not an array")),
    }
}

/// Removes every dotted path in `fields`.
pub fn apply_removed_fields(target: &mut Map<String, Value>, fields: &[String]) -> CoreResult<()> {
    for field in fields {
        remove(target, &FieldPath::parse(field)?);
    }
    Ok(())
}

/// Truncates every array listed in `arrays`.
pub fn apply_truncated_arrays(
    target: &mut Map<String, Value>,
    arrays: &[TruncatedArray],
) -> CoreResult<()> {
    for array in arrays {
        truncate(target, &FieldPath::parse(&array.field)?, array.new_size)?;
    }
    Ok(())
}

/// Sets every dotted path in `updates`, in the map's insertion order.
pub fn apply_updated_fields(
    target: &mut Map<String, Value>,
    updates: &Map<String, Value>,
) -> CoreResult<()> {
    for (field, value) in updates {
        set(target, &FieldPath::parse(field)?, value.clone())?;
    }
    Ok(())
}

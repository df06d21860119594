//! Structural difference between two content snapshots.
//!
//! Paths are reported as nested objects mirroring the snapshot, so a change
//! of `properties.Name.title` shows up as
//! `{"properties": {"Name": {"title": ...}}}`. Arrays are compared as whole
//! values. Numbers compare by value regardless of integer/float encoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::contract::ITEM_MARKER_FIELD;

/// Top-level fields ignored when diffing; the marker always changes.
const IGNORED_TOP_LEVEL_FIELDS: &[&str] = &[ITEM_MARKER_FIELD];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangedFields {
    pub old: Map<String, Value>,
    pub new: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentDiff {
    pub added: Map<String, Value>,
    pub changed: ChangedFields,
    pub deleted: Map<String, Value>,
}

impl ContentDiff {
    pub fn between(previous: &Value, current: &Value) -> Self {
        let empty = Map::new();
        let previous = previous.as_object().unwrap_or(&empty);
        let current = current.as_object().unwrap_or(&empty);

        let mut diff = ContentDiff::default();
        diff_objects(previous, current, IGNORED_TOP_LEVEL_FIELDS, &mut diff);
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.changed.old.is_empty()
            && self.changed.new.is_empty()
            && self.deleted.is_empty()
    }
}

fn diff_objects(
    previous: &Map<String, Value>,
    current: &Map<String, Value>,
    ignored: &[&str],
    out: &mut ContentDiff,
) {
    for (key, current_value) in current {
        if ignored.contains(&key.as_str()) {
            continue;
        }
        match (previous.get(key), current_value) {
            (None, _) => {
                out.added.insert(key.clone(), current_value.clone());
            }
            (Some(Value::Object(previous_child)), Value::Object(current_child)) => {
                let mut nested = ContentDiff::default();
                diff_objects(previous_child, current_child, &[], &mut nested);
                merge_nested(key, nested, out);
            }
            (Some(previous_value), _) => {
                if !values_equal(previous_value, current_value) {
                    out.changed.old.insert(key.clone(), previous_value.clone());
                    out.changed.new.insert(key.clone(), current_value.clone());
                }
            }
        }
    }

    for (key, previous_value) in previous {
        if ignored.contains(&key.as_str()) || current.contains_key(key) {
            continue;
        }
        out.deleted.insert(key.clone(), previous_value.clone());
    }
}

fn merge_nested(key: &str, nested: ContentDiff, out: &mut ContentDiff) {
    insert_non_empty(&mut out.added, key, nested.added);
    insert_non_empty(&mut out.changed.old, key, nested.changed.old);
    insert_non_empty(&mut out.changed.new, key, nested.changed.new);
    insert_non_empty(&mut out.deleted, key, nested.deleted);
}

fn insert_non_empty(target: &mut Map<String, Value>, key: &str, child: Map<String, Value>) {
    if !child.is_empty() {
        target.insert(key.to_string(), Value::Object(child));
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

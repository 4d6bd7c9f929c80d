//! Structural manifest diffing
//!
//! Compares a previously applied document with the currently declared one
//! after normalising away deploy-time noise: the rename applied to Job-like
//! kinds, machine-managed annotations, and the order of arrays whose
//! elements are identified by a `name` field.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::{ChangeTag, TextDiff};

use crate::annotations::{MACHINE_MANAGED, annotation};

/// Kind of a single change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    New,
    Edit,
    Delete,
}

/// One structural difference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lhs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhs: Option<Value>,
}

impl Change {
    fn new(path: &[String], rhs: &Value) -> Self {
        Self {
            kind: ChangeKind::New,
            path: path.to_vec(),
            lhs: None,
            rhs: Some(rhs.clone()),
        }
    }

    fn edit(path: &[String], lhs: &Value, rhs: &Value) -> Self {
        Self {
            kind: ChangeKind::Edit,
            path: path.to_vec(),
            lhs: Some(lhs.clone()),
            rhs: Some(rhs.clone()),
        }
    }

    fn delete(path: &[String], lhs: &Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            path: path.to_vec(),
            lhs: Some(lhs.clone()),
            rhs: None,
        }
    }
}

/// Result of [`diff`]; empty means "no differences"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Differences(Vec<Change>);

impl Differences {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn changes(&self) -> &[Change] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.0.iter()
    }
}

/// Diff `latest` against `previous`, or against `{}` when there is no previous
pub fn diff(previous: Option<&Value>, latest: &Value) -> Differences {
    let previous = previous
        .map(normalize)
        .unwrap_or_else(|| Value::Object(Map::new()));
    let latest = normalize(latest);

    let mut changes = Vec::new();
    walk(&mut Vec::new(), &previous, &latest, &mut changes);
    Differences(changes)
}

/// Unified text diff of the two normalised documents, for display
pub fn render(previous: Option<&Value>, latest: &Value) -> String {
    let old = previous
        .map(|p| to_yaml(&strip(p)))
        .unwrap_or_default();
    let new = to_yaml(&strip(latest));

    let mut output = String::new();
    for change in TextDiff::from_lines(&old, &new).iter_all_changes() {
        let prefix = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        output.push_str(prefix);
        output.push_str(change.value().trim_end());
        output.push('\n');
    }
    output
}

fn to_yaml(value: &Value) -> String {
    serde_yaml::to_string(value).unwrap_or_default()
}

/// Restore the original name and drop machine-managed annotations
fn strip(value: &Value) -> Value {
    let mut value = value.clone();
    let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) else {
        return value;
    };

    let original_name = metadata
        .get("annotations")
        .and_then(|a| a.get(annotation::ORIGINAL_NAME))
        .cloned();
    if let Some(name) = original_name {
        metadata.insert("name".to_string(), name);
    }

    let empty = match metadata.get_mut("annotations").and_then(Value::as_object_mut) {
        Some(annotations) => {
            for key in MACHINE_MANAGED {
                annotations.remove(*key);
            }
            annotations.is_empty()
        }
        None => false,
    };
    if empty {
        metadata.remove("annotations");
    }
    value
}

fn normalize(value: &Value) -> Value {
    let mut value = strip(value);
    index_arrays_by_name(&mut value);
    value
}

/// Re-key arrays of named objects into maps so element order does not matter
fn index_arrays_by_name(value: &mut Value) {
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                index_arrays_by_name(item);
            }
            if let Some(names) = element_names(items) {
                let indexed = names.into_iter().zip(items.drain(..)).collect::<Map<_, _>>();
                *value = Value::Object(indexed);
            }
        }
        Value::Object(map) => {
            for child in map.values_mut() {
                index_arrays_by_name(child);
            }
        }
        _ => {}
    }
}

/// Unique names of every element, if all elements are named objects
fn element_names(items: &[Value]) -> Option<Vec<String>> {
    if items.is_empty() {
        return None;
    }
    let names = items
        .iter()
        .map(|item| match item.get("name")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    let unique: BTreeSet<_> = names.iter().collect();
    (unique.len() == names.len()).then_some(names)
}

fn walk(path: &mut Vec<String>, lhs: &Value, rhs: &Value, out: &mut Vec<Change>) {
    match (lhs, rhs) {
        (Value::Object(left), Value::Object(right)) => {
            for (key, l) in left {
                path.push(key.clone());
                match right.get(key) {
                    Some(r) => walk(path, l, r, out),
                    None => out.push(Change::delete(path, l)),
                }
                path.pop();
            }
            for (key, r) in right {
                if !left.contains_key(key) {
                    path.push(key.clone());
                    out.push(Change::new(path, r));
                    path.pop();
                }
            }
        }
        (Value::Array(left), Value::Array(right)) => {
            for i in 0..left.len().max(right.len()) {
                path.push(i.to_string());
                match (left.get(i), right.get(i)) {
                    (Some(l), Some(r)) => walk(path, l, r, out),
                    (Some(l), None) => out.push(Change::delete(path, l)),
                    (None, Some(r)) => out.push(Change::new(path, r)),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        (l, r) if l != r => out.push(Change::edit(path, l, r)),
        _ => {}
    }
}

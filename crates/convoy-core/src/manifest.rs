//! Declared manifests and live cluster resources
//!
//! Both are thin wrappers over a `serde_json::Value` document. Manifests are
//! mutated while being annotated; live resources are read-only snapshots
//! returned by the cluster.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::annotations::{ResourceRef, annotation, parse_depends_on};
use crate::error::{CoreError, Result};
use crate::kinds::ResourceKind;

/// Read accessors shared by manifests and live resources
pub trait ResourceObject {
    fn value(&self) -> &Value;

    fn kind_str(&self) -> &str {
        self.value()
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// `None` for kinds convoy does not support
    fn kind(&self) -> Option<ResourceKind> {
        self.kind_str().parse().ok()
    }

    fn name(&self) -> &str {
        self.value()
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn labels(&self) -> BTreeMap<String, String> {
        string_map(self.value().pointer("/metadata/labels"))
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.value()
            .pointer("/metadata/labels")
            .and_then(|l| l.get(key))
            .and_then(Value::as_str)
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        string_map(self.value().pointer("/metadata/annotations"))
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.value()
            .pointer("/metadata/annotations")
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    /// Original declared name, falling back to the current name
    fn original_name(&self) -> &str {
        self.annotation(annotation::ORIGINAL_NAME)
            .unwrap_or_else(|| self.name())
    }

    /// `spec.selector.matchLabels` for workloads, `spec.selector` for Services
    fn selector(&self) -> BTreeMap<String, String> {
        let selector = self.value().pointer("/spec/selector");
        match selector.and_then(|s| s.get("matchLabels")) {
            Some(match_labels) => string_map(Some(match_labels)),
            None => string_map(selector),
        }
    }

    fn dependencies(&self) -> Vec<ResourceRef> {
        parse_depends_on(&self.annotations())
    }

    fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.kind_str(), self.name())
    }
}

/// A declared resource read from the manifest directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Value);

impl Manifest {
    /// Wrap a document, requiring `kind` and `metadata.name`
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.get("kind").is_some_and(Value::is_string) {
            return Err(CoreError::MissingField {
                field: "kind".to_string(),
            });
        }
        if !value
            .pointer("/metadata/name")
            .is_some_and(Value::is_string)
        {
            return Err(CoreError::MissingField {
                field: "metadata.name".to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn set_name(&mut self, name: &str) {
        object_at(&mut self.0, &["metadata"])
            .insert("name".to_string(), Value::String(name.to_string()));
    }

    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        object_at(&mut self.0, &["metadata", "annotations"])
            .insert(key.to_string(), Value::String(value.into()));
    }

    pub fn set_label(&mut self, key: &str, value: impl Into<String>) {
        object_at(&mut self.0, &["metadata", "labels"])
            .insert(key.to_string(), Value::String(value.into()));
    }

    /// Mutable object at `path`, created along the way when missing
    pub fn object_mut(&mut self, path: &[&str]) -> &mut Map<String, Value> {
        object_at(&mut self.0, path)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl ResourceObject for Manifest {
    fn value(&self) -> &Value {
        &self.0
    }
}

/// A resource as reported by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveResource(Value);

impl LiveResource {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
            .pointer("/metadata/creationTimestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    pub fn generation(&self) -> Option<i64> {
        int_at(&self.0, "/metadata/generation")
    }

    /// The declared document embedded at the last apply, if any
    pub fn last_applied_configuration(&self) -> Option<Value> {
        self.annotation(annotation::LAST_APPLIED_CONFIGURATION)
            .and_then(|s| serde_json::from_str(s).ok())
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.annotation(annotation::LAST_UPDATED)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
    }
}

impl ResourceObject for LiveResource {
    fn value(&self) -> &Value {
        &self.0
    }
}

impl From<Manifest> for LiveResource {
    fn from(manifest: Manifest) -> Self {
        Self(manifest.0)
    }
}

/// Integer at a JSON pointer, accepting numbers or numeric strings
pub fn int_at(value: &Value, pointer: &str) -> Option<i64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) => Some((k.clone(), s.clone())),
                    Value::Number(n) => Some((k.clone(), n.to_string())),
                    Value::Bool(b) => Some((k.clone(), b.to_string())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            ensure_object(other)
        }
    }
}

fn object_at<'a>(value: &'a mut Value, path: &[&str]) -> &'a mut Map<String, Value> {
    let map = ensure_object(value);
    match path.split_first() {
        None => map,
        Some((key, rest)) => object_at(
            map.entry(key.to_string()).or_insert(Value::Null),
            rest,
        ),
    }
}

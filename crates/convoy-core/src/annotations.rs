//! Machine-managed annotation and label keys
//!
//! Convoy writes a fixed set of annotations on every manifest it deploys so
//! later runs can diff against what was applied, undo renames and detect
//! stale commits. Users must never set the reserved labels themselves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Annotations written by the annotator
pub mod annotation {
    /// Deploy UUID of the run that last touched the resource
    pub const UUID: &str = "convoy.io/uuid";
    /// JSON commit metadata of the deployed revision
    pub const COMMIT: &str = "convoy.io/commit";
    /// Declared name before any rename (Job-like kinds, deploy-id suffixes)
    pub const ORIGINAL_NAME: &str = "convoy.io/original-name";
    /// Canonical JSON of the declared manifest
    pub const LAST_APPLIED_CONFIGURATION: &str = "convoy.io/last-applied-configuration";
    /// SHA-1 of `LAST_APPLIED_CONFIGURATION`
    pub const LAST_APPLIED_CONFIGURATION_HASH: &str = "convoy.io/last-applied-configuration-sha1";
    /// RFC 3339 start time of the run that last touched the resource
    pub const LAST_UPDATED: &str = "convoy.io/last-updated";
    /// Release identifier supplied by the caller
    pub const RELEASE_ID: &str = "convoy.io/release-id";
    /// Name reported to webhooks instead of the resource name
    pub const ALIAS_NAME: &str = "convoy.io/alias-name";
    /// Declared dependencies, "Kind/name,Kind/name"
    pub const DEPENDS_ON: &str = "convoy.io/depends-on";
}

/// Reserved and required labels
pub mod label {
    /// Deploy id, reserved
    pub const ID: &str = "id";
    /// Logical application name, required on Deployments and Service selectors
    pub const NAME: &str = "name";
    /// Strategy name, reserved
    pub const STRATEGY: &str = "strategy";
}

/// Annotations stripped from the candidate side before diffing
pub const MACHINE_MANAGED: &[&str] = &[
    annotation::ORIGINAL_NAME,
    annotation::LAST_APPLIED_CONFIGURATION,
    annotation::LAST_APPLIED_CONFIGURATION_HASH,
    annotation::COMMIT,
    annotation::LAST_UPDATED,
    annotation::UUID,
    annotation::RELEASE_ID,
];

/// Reference to another resource by kind and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Parse declared dependencies
/// Format: "Kind/name" or "Kind/name,Kind/name"
pub fn parse_depends_on(annotations: &BTreeMap<String, String>) -> Vec<ResourceRef> {
    annotations
        .get(annotation::DEPENDS_ON)
        .map(|s| {
            s.split(',')
                .filter_map(|dep| {
                    let (kind, name) = dep.trim().split_once('/')?;
                    let (kind, name) = (kind.trim(), name.trim());
                    if kind.is_empty() || name.is_empty() || name.contains('/') {
                        return None;
                    }
                    Some(ResourceRef::new(kind, name))
                })
                .collect()
        })
        .unwrap_or_default()
}

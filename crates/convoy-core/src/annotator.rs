//! Manifest annotation
//!
//! Every manifest passes through the [`Annotator`] before it is diffed or
//! applied. It records the declared document and its hash, the commit, the
//! run timestamp and identifiers, gives Job-like kinds a content-derived
//! name, and enforces the reserved/required label and selector rules.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::annotations::{annotation, label};
use crate::commit::CommitInfo;
use crate::error::{CoreError, Result};
use crate::kinds::{ResourceKind, StrategyKind};
use crate::manifest::{Manifest, ResourceObject};

/// Deploy id used when none is configured
pub const UNSPECIFIED_DEPLOY_ID: &str = "unspecified";

#[derive(Debug, Clone)]
pub struct Annotator {
    strategy: StrategyKind,
    deploy_id: Option<String>,
    uuid: Option<String>,
    release_id: Option<String>,
    commit: CommitInfo,
    started: DateTime<Utc>,
}

impl Annotator {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            deploy_id: None,
            uuid: None,
            release_id: None,
            commit: CommitInfo::default(),
            started: Utc::now(),
        }
    }

    pub fn with_deploy_id(mut self, deploy_id: Option<String>) -> Self {
        self.deploy_id = deploy_id.filter(|id| !id.is_empty());
        self
    }

    pub fn with_uuid(mut self, uuid: Option<String>) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_release_id(mut self, release_id: Option<String>) -> Self {
        self.release_id = release_id;
        self
    }

    pub fn with_commit(mut self, commit: CommitInfo) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_start(mut self, started: DateTime<Utc>) -> Self {
        self.started = started;
        self
    }

    pub fn deploy_id(&self) -> &str {
        self.deploy_id.as_deref().unwrap_or(UNSPECIFIED_DEPLOY_ID)
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn commit(&self) -> &CommitInfo {
        &self.commit
    }

    /// Annotate, label and rename a declared manifest in place
    pub fn annotate(&self, manifest: &mut Manifest) -> Result<()> {
        let declared = manifest.to_json()?;
        let hash = sha1_hex(&declared);
        let original_name = manifest.name().to_string();

        let name = match manifest.kind() {
            Some(kind) if kind.is_job_like() => format!("{original_name}-{hash}"),
            _ => original_name.clone(),
        };

        if let Some(uuid) = &self.uuid {
            manifest.set_annotation(annotation::UUID, uuid.as_str());
        }
        if let Some(release_id) = &self.release_id {
            manifest.set_annotation(annotation::RELEASE_ID, release_id.as_str());
        }
        manifest.set_annotation(annotation::ORIGINAL_NAME, original_name);
        manifest.set_name(&name);
        manifest.set_annotation(annotation::LAST_APPLIED_CONFIGURATION, declared);
        manifest.set_annotation(annotation::LAST_APPLIED_CONFIGURATION_HASH, hash);
        manifest.set_annotation(annotation::COMMIT, self.commit.to_annotation());
        manifest.set_annotation(
            annotation::LAST_UPDATED,
            self.started.to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        self.labels(manifest)?;
        self.selectors(manifest)?;
        Ok(())
    }

    fn labels(&self, manifest: &mut Manifest) -> Result<()> {
        if manifest.label(label::ID).is_some() {
            return Err(CoreError::ReservedLabel {
                label: label::ID.to_string(),
                name: manifest.name().to_string(),
            });
        }
        manifest.set_label(label::ID, self.deploy_id());

        if manifest.kind() == Some(ResourceKind::Deployment) && manifest.label(label::NAME).is_none()
        {
            return Err(CoreError::MissingLabel {
                label: label::NAME.to_string(),
                name: manifest.name().to_string(),
            });
        }

        manifest.set_label(label::STRATEGY, self.strategy.as_str());
        Ok(())
    }

    fn selectors(&self, manifest: &mut Manifest) -> Result<()> {
        match manifest.kind() {
            Some(ResourceKind::Deployment) => self.deployment_selectors(manifest),
            Some(ResourceKind::Service) => self.service_selectors(manifest),
            _ => Ok(()),
        }
    }

    fn deployment_selectors(&self, manifest: &mut Manifest) -> Result<()> {
        manifest
            .object_mut(&["spec", "selector", "matchLabels"])
            .insert(label::STRATEGY.to_string(), self.strategy.as_str().into());

        // Template labels and matchLabels must agree both ways
        let template = manifest
            .object_mut(&["spec", "template", "metadata", "labels"])
            .clone();
        let match_labels = manifest.object_mut(&["spec", "selector", "matchLabels"]);
        for (key, value) in template {
            match_labels.entry(key).or_insert(value);
        }
        let merged = match_labels.clone();
        manifest
            .object_mut(&["spec", "template", "metadata", "labels"])
            .extend(merged);

        let name = manifest.name().to_string();
        let selector_name = manifest
            .object_mut(&["spec", "selector", "matchLabels"])
            .get(label::NAME)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CoreError::MissingSelector {
                label: label::NAME.to_string(),
                name: name.clone(),
            })?;
        let label_name = manifest.label(label::NAME).unwrap_or_default();
        if label_name != selector_name {
            return Err(CoreError::SelectorMismatch {
                label: label::NAME.to_string(),
                label_value: label_name.to_string(),
                selector_value: selector_name,
                name,
            });
        }
        Ok(())
    }

    fn service_selectors(&self, manifest: &mut Manifest) -> Result<()> {
        let name = manifest.name().to_string();
        let selector = manifest.object_mut(&["spec", "selector"]);
        if !selector.contains_key(label::NAME) {
            return Err(CoreError::MissingSelector {
                label: label::NAME.to_string(),
                name,
            });
        }
        if selector.contains_key(label::STRATEGY) {
            return Err(CoreError::ReservedLabel {
                label: label::STRATEGY.to_string(),
                name,
            });
        }
        selector.insert(label::STRATEGY.to_string(), self.strategy.as_str().into());
        Ok(())
    }
}

pub fn sha1_hex(input: &str) -> String {
    hex::encode(Sha1::digest(input.as_bytes()))
}

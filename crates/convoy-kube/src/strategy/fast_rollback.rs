//! Fast rollback strategy
//!
//! Each deploy id gets its own Deployment named `<name>-<deploy id>` with an
//! `id` label in its selector and pod template. Services select pods by id,
//! so switching a Service's selector is the whole rollout and rolling back is
//! redeploying an older id whose Deployment is still on reserve.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_core::{
    CoreError, Differences, LiveResource, Manifest, ResourceKind, ResourceObject, StrategyKind,
    UNSPECIFIED_DEPLOY_ID, annotation, label, selector,
};
use serde_json::Value;

use super::{
    DeferredService, DeployStrategy, Tracker, cleanup, is_deployment, is_service,
    verify_same_original_name,
};
use crate::cluster::ClusterApi;
use crate::error::{DeployError, Result};
use crate::events::Reporter;

/// Older deployments kept around as rollback targets
pub const NUM_DESIRED_RESERVE: usize = 3;

pub struct FastRollback {
    cluster: Arc<dyn ClusterApi>,
    deploy_id: String,
    reporter: Reporter,
    tracker: Tracker,
}

impl FastRollback {
    pub fn new(cluster: Arc<dyn ClusterApi>, deploy_id: &str, reporter: Reporter) -> Self {
        let deploy_id = if deploy_id.is_empty() {
            UNSPECIFIED_DEPLOY_ID.to_string()
        } else {
            deploy_id.to_string()
        };
        Self {
            cluster,
            deploy_id,
            reporter,
            tracker: Tracker::default(),
        }
    }

    pub fn deploy_id(&self) -> &str {
        &self.deploy_id
    }

    /// Apply deferred services, refusing to switch a selector to no pods
    /// unless `require_pods` is off
    async fn deploy_services(&self, require_pods: bool) -> Result<()> {
        let services = self.tracker.services();
        for service in &services {
            self.deploy_service(service, require_pods).await?;
        }
        self.reporter
            .info(format!("Deployed {} held back services", services.len()));
        Ok(())
    }

    async fn deploy_service(&self, service: &DeferredService, require_pods: bool) -> Result<()> {
        let name = service.manifest.name();
        let pod_selector = selector::equality_selector(&service.manifest.selector());
        let pods = self
            .cluster
            .list(&[ResourceKind::Pod], Some(&pod_selector))
            .await?;
        match (pods.len(), require_pods) {
            (0, true) => {
                return Err(DeployError::NoMatchingPods {
                    name: name.to_string(),
                    selector: pod_selector,
                });
            }
            (0, false) => self.reporter.warn(format!(
                "No pods match the service selector {pod_selector} of {name} yet"
            )),
            (count, _) => self.reporter.info(format!(
                "Verified {count} pods match the service selector {pod_selector}"
            )),
        }

        if let Some(live) = self.cluster.get(ResourceKind::Service, name).await? {
            let declared = service
                .manifest
                .annotation(annotation::LAST_UPDATED)
                .and_then(parse_timestamp);
            if let (Some(current), Some(declared)) = (live.last_updated(), declared)
                && current > declared
            {
                return Err(DeployError::UpdatedSinceStart {
                    kind: ResourceKind::Service.to_string(),
                    name: name.to_string(),
                });
            }
        }

        self.cluster.apply(&service.path).await?;
        if require_pods {
            self.reporter.info(format!(
                "Deployed service {name} after all deployments were available"
            ));
        } else {
            self.reporter.info(format!("Deployed held back service {name}"));
        }
        Ok(())
    }

    /// Live creation time of a tracked deployment and its fast-rollback
    /// siblings under other deploy ids
    async fn siblings(&self, manifest: &Manifest) -> Result<(DateTime<Utc>, Vec<LiveResource>)> {
        let name = manifest.name();
        let live = self
            .cluster
            .get(ResourceKind::Deployment, name)
            .await?
            .ok_or_else(|| DeployError::NotFound {
                kind: ResourceKind::Deployment.to_string(),
                name: name.to_string(),
            })?;
        let created = live
            .creation_timestamp()
            .ok_or_else(|| missing(name, "creationTimestamp"))?;
        let group = live
            .label(label::NAME)
            .ok_or_else(|| missing(name, "name label"))?;
        let id = live
            .label(label::ID)
            .ok_or_else(|| missing(name, "id label"))?;

        let group_selector = format!(
            "{}={group},{}!={id},{}={}",
            label::NAME,
            label::ID,
            label::STRATEGY,
            StrategyKind::FastRollback
        );
        let items = self
            .cluster
            .list(&[ResourceKind::Deployment], Some(&group_selector))
            .await?;
        let verified = verify_same_original_name(items, manifest);
        self.reporter.debug(format!(
            "Found {} deployments in the {name} group {group_selector}",
            verified.len()
        ));
        Ok((created, verified))
    }

    /// Remove deployments created after the one being deployed, so a
    /// rollback leaves the older id as the newest
    async fn delete_newer(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for tracked in self.tracker.deployments() {
            let (created, siblings) = self.siblings(&tracked.manifest).await?;
            let newer: Vec<_> = siblings
                .into_iter()
                .filter(|d| d.creation_timestamp().is_some_and(|t| t > created))
                .collect();
            if !newer.is_empty() {
                self.reporter.info(format!(
                    "Deleting {} deployments newer than {}",
                    newer.len(),
                    tracked.manifest.name()
                ));
            }
            for deployment in newer {
                self.cluster
                    .delete(ResourceKind::Deployment, deployment.name())
                    .await?;
                self.reporter
                    .info(format!("Deleted newer deployment {}", deployment.name()));
                deleted.push(deployment.name().to_string());
            }
        }
        Ok(deleted)
    }

    /// Trim older deployments down to the reserve count
    async fn delete_backups(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for tracked in self.tracker.deployments() {
            let (created, siblings) = self.siblings(&tracked.manifest).await?;
            let older: Vec<_> = siblings
                .into_iter()
                .filter(|d| d.creation_timestamp().is_none_or(|t| t <= created))
                .collect();
            let doomed = backups_to_delete(older, NUM_DESIRED_RESERVE);
            if doomed.is_empty() {
                self.reporter.debug(format!(
                    "Keeping every backup of {}, not more than {NUM_DESIRED_RESERVE} on reserve",
                    tracked.manifest.name()
                ));
            }
            for deployment in doomed {
                self.cluster
                    .delete(ResourceKind::Deployment, deployment.name())
                    .await?;
                self.reporter
                    .info(format!("Deleted backup deployment {}", deployment.name()));
                deleted.push(deployment.name().to_string());
            }
        }
        Ok(deleted)
    }
}

/// Oldest backups beyond the `reserve` most recent ones
pub fn backups_to_delete(mut backups: Vec<LiveResource>, reserve: usize) -> Vec<LiveResource> {
    if backups.len() <= reserve {
        return Vec::new();
    }
    backups.sort_by_key(LiveResource::creation_timestamp);
    let excess = backups.len() - reserve;
    backups.drain(..excess).collect()
}

fn missing(name: &str, field: &str) -> DeployError {
    DeployError::MissingLiveField {
        kind: ResourceKind::Deployment.to_string(),
        name: name.to_string(),
        field: field.to_string(),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn reserved_id(manifest: &Manifest) -> CoreError {
    CoreError::ReservedLabel {
        label: label::ID.to_string(),
        name: manifest.name().to_string(),
    }
}

#[async_trait]
impl DeployStrategy for FastRollback {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FastRollback
    }

    fn annotate(&self, manifest: &mut Manifest) -> convoy_core::Result<()> {
        let id = Value::String(self.deploy_id.clone());
        if is_deployment(manifest) {
            let preset = manifest
                .object_mut(&["spec", "selector", "matchLabels"])
                .contains_key(label::ID)
                || manifest
                    .object_mut(&["spec", "template", "metadata", "labels"])
                    .contains_key(label::ID);
            if preset {
                return Err(reserved_id(manifest));
            }
            let name = format!("{}-{}", manifest.name(), self.deploy_id);
            manifest.set_name(&name);
            manifest
                .object_mut(&["spec", "selector", "matchLabels"])
                .insert(label::ID.to_string(), id.clone());
            manifest
                .object_mut(&["spec", "template", "metadata", "labels"])
                .insert(label::ID.to_string(), id);
        } else if is_service(manifest) {
            if manifest
                .object_mut(&["spec", "selector"])
                .contains_key(label::ID)
            {
                return Err(reserved_id(manifest));
            }
            manifest
                .object_mut(&["spec", "selector"])
                .insert(label::ID.to_string(), id);
        }
        Ok(())
    }

    fn skip_deploy(
        &self,
        manifest: &Manifest,
        found: Option<&LiveResource>,
        differences: &Differences,
    ) -> bool {
        match manifest.kind() {
            Some(ResourceKind::Deployment) => {
                self.tracker.track_deployment(manifest, found.is_none());
                if found.is_some() {
                    self.reporter.info(format!(
                        "Deployment {} already exists in the cluster so skipping",
                        manifest.name()
                    ));
                }
                found.is_some()
            }
            // The declared document never carries the id, so a selector
            // switch to another deploy id is not visible in the diff
            Some(ResourceKind::Service) => {
                let live_id = found.and_then(|live| {
                    live.value()
                        .pointer("/spec/selector/id")
                        .and_then(Value::as_str)
                });
                differences.is_empty() && live_id == Some(self.deploy_id.as_str())
            }
            _ => false,
        }
    }

    async fn pre_deploy(
        &self,
        manifest: &Manifest,
        found: bool,
        _differences: &Differences,
        path: &Path,
    ) -> Result<bool> {
        // A new Service has no traffic to move, so it goes out right away
        if !is_service(manifest) || !found {
            return Ok(false);
        }
        self.reporter.info(format!(
            "Waiting for all deployments to be available before deploying service {}",
            manifest.name()
        ));
        self.tracker.defer(manifest, path);
        Ok(true)
    }

    async fn all_available(&self, manifests: &[Manifest]) -> Result<()> {
        self.reporter
            .info(format!("All {} manifests are available", manifests.len()));
        self.deploy_services(true).await?;

        let newer = self.delete_newer().await?;
        if !newer.is_empty() {
            self.reporter
                .info(format!("Deleted {} newer deployments", newer.len()));
        }
        let backups = self.delete_backups().await?;
        if !backups.is_empty() {
            self.reporter
                .info(format!("Deleted {} backup deployments", backups.len()));
        }

        cleanup(
            self.cluster.as_ref(),
            self.kind(),
            &self.tracker.deployments(),
            &self.reporter,
        )
        .await
    }

    async fn release_deferred(&self) -> Result<()> {
        self.deploy_services(false).await
    }

    fn deferred(&self) -> Vec<String> {
        self.tracker.service_names()
    }
}

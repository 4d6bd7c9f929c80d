//! Deploy strategies
//!
//! A strategy decides how a cluster moves from one deploy to the next:
//!
//! - **rolling-update**: deployments are patched in place and Kubernetes
//!   rolls the pods.
//! - **fast-rollback**: every deploy id gets its own Deployment
//!   (`<name>-<deploy id>`). Services switch over once the new pods are
//!   available and the previous deployments stay around as backups.
//!
//! Both strategies hold back Services that would start routing to pods
//! before their Deployment is available, then flush them in
//! [`DeployStrategy::all_available`] together with the cleanup of leftover
//! deployments and replica sets. Without availability checking the services
//! go out through [`DeployStrategy::release_deferred`] and nothing is
//! cleaned up.

mod cleanup;
mod fast_rollback;
mod rolling_update;

pub use cleanup::{cleanup, verify_same_original_name};
pub use fast_rollback::{FastRollback, NUM_DESIRED_RESERVE};
pub use rolling_update::RollingUpdate;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use convoy_core::{
    Differences, LiveResource, Manifest, ResourceKind, ResourceObject, StrategyKind, selector,
};

use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::events::Reporter;

/// Policy hooks called by the orchestrator for every manifest
#[async_trait]
pub trait DeployStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Strategy specific changes made after the common annotation
    fn annotate(&self, manifest: &mut Manifest) -> convoy_core::Result<()>;

    /// True when the manifest does not need to be deployed
    fn skip_deploy(
        &self,
        manifest: &Manifest,
        found: Option<&LiveResource>,
        differences: &Differences,
    ) -> bool;

    /// Called right before deploying; true defers the manifest to
    /// [`DeployStrategy::all_available`]
    async fn pre_deploy(
        &self,
        manifest: &Manifest,
        found: bool,
        differences: &Differences,
        path: &Path,
    ) -> Result<bool>;

    /// Called once every manifest of the cluster is available
    async fn all_available(&self, manifests: &[Manifest]) -> Result<()>;

    /// Deploy held back services when availability is never confirmed
    async fn release_deferred(&self) -> Result<()>;

    /// Services held back by `pre_deploy`
    fn deferred(&self) -> Vec<String>;
}

/// Build the strategy for one cluster
pub fn for_kind(
    kind: StrategyKind,
    cluster: Arc<dyn ClusterApi>,
    deploy_id: &str,
    reporter: Reporter,
) -> Box<dyn DeployStrategy> {
    match kind {
        StrategyKind::RollingUpdate => Box::new(RollingUpdate::new(cluster, reporter)),
        StrategyKind::FastRollback => Box::new(FastRollback::new(cluster, deploy_id, reporter)),
    }
}

/// A Deployment seen during planning
#[derive(Debug, Clone)]
pub struct TrackedDeployment {
    pub manifest: Manifest,
    /// False when the deployment was skipped
    pub deploying: bool,
}

/// A Service waiting for its Deployments to become available
#[derive(Debug, Clone)]
pub struct DeferredService {
    pub manifest: Manifest,
    pub path: PathBuf,
}

/// Planning state shared by both strategies
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    inner: Mutex<Tracked>,
}

#[derive(Debug, Default)]
struct Tracked {
    deployments: Vec<TrackedDeployment>,
    services: Vec<DeferredService>,
}

impl Tracker {
    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn track_deployment(&self, manifest: &Manifest, deploying: bool) {
        self.lock().deployments.push(TrackedDeployment {
            manifest: manifest.clone(),
            deploying,
        });
    }

    pub(crate) fn deployments(&self) -> Vec<TrackedDeployment> {
        self.lock().deployments.clone()
    }

    pub(crate) fn defer(&self, manifest: &Manifest, path: &Path) {
        self.lock().services.push(DeferredService {
            manifest: manifest.clone(),
            path: path.to_path_buf(),
        });
    }

    pub(crate) fn services(&self) -> Vec<DeferredService> {
        self.lock().services.clone()
    }

    pub(crate) fn service_names(&self) -> Vec<String> {
        self.lock()
            .services
            .iter()
            .map(|s| s.manifest.name().to_string())
            .collect()
    }

    /// A Service waits when it already routes traffic, or when it selects
    /// pods of a Deployment that is being deployed in this run
    pub(crate) fn should_defer(&self, service: &Manifest, found: bool) -> bool {
        if found {
            return true;
        }
        let selector = selector::equality_selector(&service.selector());
        self.lock()
            .deployments
            .iter()
            .filter(|d| d.deploying)
            .any(|d| {
                let labels = template_labels(&d.manifest);
                !labels.is_empty() && selector::matches(Some(&labels), Some(&selector))
            })
    }
}

fn template_labels(manifest: &Manifest) -> std::collections::BTreeMap<String, String> {
    manifest
        .value()
        .pointer("/spec/template/metadata/labels")
        .and_then(|l| l.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn is_deployment(manifest: &Manifest) -> bool {
    manifest.kind() == Some(ResourceKind::Deployment)
}

pub(crate) fn is_service(manifest: &Manifest) -> bool {
    manifest.kind() == Some(ResourceKind::Service)
}

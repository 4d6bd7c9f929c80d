//! Cluster access
//!
//! Everything convoy needs from a cluster goes through [`ClusterApi`]:
//! listing and reading resources, applying files, deleting and reading the
//! event list. [`KubeCluster`] talks to a real API server through kube-rs,
//! [`MockCluster`] keeps resources in memory for tests, and [`DryRunCluster`]
//! wraps either one and turns every mutation into a log line.

mod dry_run;
mod remote;
mod mock;

pub use dry_run::DryRunCluster;
pub use remote::{KubeCluster, KubeConnector};
pub use mock::{MockCluster, MockConnector, OperationCounts};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_core::{ClusterConfig, LiveResource, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a manifest file is sent to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMethod {
    Create,
    Apply,
    Recreate,
}

impl DeployMethod {
    /// `Create` when not found, `Recreate` for kinds that cannot be patched
    pub fn decide(kind: ResourceKind, found: bool) -> Self {
        if !found {
            DeployMethod::Create
        } else if kind.requires_recreate() {
            DeployMethod::Recreate
        } else {
            DeployMethod::Apply
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMethod::Create => "create",
            DeployMethod::Apply => "apply",
            DeployMethod::Recreate => "recreate",
        }
    }
}

impl std::fmt::Display for DeployMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cluster event, flattened from core/v1 Event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEvent {
    pub uid: String,
    /// `Normal` or `Warning`
    pub event_type: String,
    pub reason: String,
    pub message: String,
    pub object_kind: String,
    pub object_name: String,
    pub object_uid: String,
    pub count: i32,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl ClusterEvent {
    pub fn is_normal(&self) -> bool {
        self.event_type == "Normal"
    }
}

/// Operations convoy performs against one cluster
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Cluster name from its config's `metadata.name`
    fn name(&self) -> &str;

    /// List resources of the given kinds, optionally filtered by a label selector
    async fn list(&self, kinds: &[ResourceKind], selector: Option<&str>)
    -> Result<Vec<LiveResource>>;

    /// Get one resource, `None` when it does not exist
    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<LiveResource>>;

    async fn create(&self, path: &Path) -> Result<String>;

    async fn apply(&self, path: &Path) -> Result<String>;

    /// Delete then create, for kinds that cannot be patched in place
    async fn recreate(&self, path: &Path) -> Result<String>;

    /// Delete a resource; deleting something that does not exist succeeds
    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<()>;

    /// Current cluster events in the working namespace
    async fn events(&self) -> Result<Vec<ClusterEvent>>;

    async fn deploy(&self, method: DeployMethod, path: &Path) -> Result<String> {
        match method {
            DeployMethod::Create => self.create(path).await,
            DeployMethod::Apply => self.apply(path).await,
            DeployMethod::Recreate => self.recreate(path).await,
        }
    }

    async fn exists(&self, kind: ResourceKind, name: &str) -> Result<bool> {
        Ok(self.get(kind, name).await?.is_some())
    }
}

/// Opens a [`ClusterApi`] for a cluster config
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, config: &ClusterConfig) -> Result<Arc<dyn ClusterApi>>;
}

/// Read a manifest file written for the cluster
pub(crate) fn read_manifest_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_method_decision() {
        assert_eq!(
            DeployMethod::decide(ResourceKind::Deployment, false),
            DeployMethod::Create
        );
        assert_eq!(
            DeployMethod::decide(ResourceKind::Deployment, true),
            DeployMethod::Apply
        );
        assert_eq!(
            DeployMethod::decide(ResourceKind::DaemonSet, true),
            DeployMethod::Recreate
        );
        assert_eq!(
            DeployMethod::decide(ResourceKind::Job, true),
            DeployMethod::Recreate
        );
        assert_eq!(
            DeployMethod::decide(ResourceKind::Job, false),
            DeployMethod::Create
        );
    }

    #[test]
    fn test_event_is_normal() {
        let event = ClusterEvent {
            event_type: "Normal".into(),
            ..Default::default()
        };
        assert!(event.is_normal());
        assert!(!ClusterEvent::default().is_normal());
    }
}

//! Rolling update strategy

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use convoy_core::{Differences, LiveResource, Manifest, ResourceObject, StrategyKind};

use super::{DeployStrategy, Tracker, cleanup, is_deployment, is_service};
use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::events::Reporter;

/// Patch resources in place and let Kubernetes roll the pods
pub struct RollingUpdate {
    cluster: Arc<dyn ClusterApi>,
    reporter: Reporter,
    tracker: Tracker,
}

impl RollingUpdate {
    pub fn new(cluster: Arc<dyn ClusterApi>, reporter: Reporter) -> Self {
        Self {
            cluster,
            reporter,
            tracker: Tracker::default(),
        }
    }
}

#[async_trait]
impl DeployStrategy for RollingUpdate {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RollingUpdate
    }

    fn annotate(&self, _manifest: &mut Manifest) -> convoy_core::Result<()> {
        Ok(())
    }

    fn skip_deploy(
        &self,
        manifest: &Manifest,
        _found: Option<&LiveResource>,
        differences: &Differences,
    ) -> bool {
        let skip = differences.is_empty();
        if is_deployment(manifest) {
            self.tracker.track_deployment(manifest, !skip);
        }
        skip
    }

    async fn pre_deploy(
        &self,
        manifest: &Manifest,
        found: bool,
        _differences: &Differences,
        path: &Path,
    ) -> Result<bool> {
        if !is_service(manifest) || !self.tracker.should_defer(manifest, found) {
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
        self.release_deferred().await?;

        cleanup(
            self.cluster.as_ref(),
            self.kind(),
            &self.tracker.deployments(),
            &self.reporter,
        )
        .await
    }

    async fn release_deferred(&self) -> Result<()> {
        for service in self.tracker.services() {
            self.cluster.apply(&service.path).await?;
            self.reporter
                .info(format!("Deployed held back service {}", service.manifest.name()));
        }
        Ok(())
    }

    fn deferred(&self) -> Vec<String> {
        self.tracker.service_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;
    use convoy_core::{ResourceKind, annotation, diff};
    use serde_json::json;

    fn service() -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "web", "labels": { "name": "web" } },
            "spec": { "selector": { "name": "web", "strategy": "rolling-update" } }
        }))
        .unwrap()
    }

    fn deployment() -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "labels": { "name": "web", "strategy": "rolling-update" },
                "annotations": { (annotation::ORIGINAL_NAME): "web" }
            },
            "spec": {
                "selector": { "matchLabels": { "name": "web", "strategy": "rolling-update" } },
                "template": { "metadata": { "labels": { "name": "web", "strategy": "rolling-update" } } }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_skip_only_without_differences() {
        let strategy = RollingUpdate::new(Arc::new(MockCluster::new("east")), Reporter::silent());
        let manifest = deployment();
        assert!(strategy.skip_deploy(&manifest, None, &Differences::none()));

        let changes = diff::diff(None, manifest.value());
        assert!(!strategy.skip_deploy(&manifest, None, &changes));
    }

    #[tokio::test]
    async fn test_existing_service_is_deferred_then_flushed() {
        let cluster = MockCluster::new("east");
        cluster.insert(deployment().into_value());
        let strategy = RollingUpdate::new(Arc::new(cluster.clone()), Reporter::silent());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("east-web.json");
        std::fs::write(&path, service().to_json().unwrap()).unwrap();

        let changes = diff::diff(None, service().value());
        assert!(strategy.skip_deploy(&deployment(), None, &Differences::none()));
        assert!(strategy.pre_deploy(&service(), true, &changes, &path).await.unwrap());
        assert_eq!(strategy.deferred(), vec!["web".to_string()]);
        assert_eq!(cluster.operation_counts().deploys(), 0);

        strategy.all_available(&[deployment(), service()]).await.unwrap();
        assert_eq!(cluster.operation_counts().applies, 1);
        assert!(cluster.resource(ResourceKind::Service, "web").is_some());
    }

    #[tokio::test]
    async fn test_new_unrelated_service_is_not_deferred() {
        let strategy = RollingUpdate::new(Arc::new(MockCluster::new("east")), Reporter::silent());
        let path = Path::new("unused.json");
        assert!(!strategy
            .pre_deploy(&service(), false, &Differences::none(), path)
            .await
            .unwrap());
        assert!(!strategy
            .pre_deploy(&deployment(), true, &Differences::none(), path)
            .await
            .unwrap());
        assert!(strategy.deferred().is_empty());
    }
}

//! Dry-run wrapper
//!
//! Reads go to the wrapped cluster; every mutation is logged and reported
//! as done without touching the cluster.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use convoy_core::{LiveResource, ResourceKind};

use super::{ClusterApi, ClusterEvent, DeployMethod};
use crate::error::Result;
use crate::events::Reporter;

pub struct DryRunCluster {
    inner: Arc<dyn ClusterApi>,
    reporter: Reporter,
}

impl DryRunCluster {
    pub fn new(inner: Arc<dyn ClusterApi>, reporter: Reporter) -> Self {
        Self { inner, reporter }
    }

    fn skip(&self, method: DeployMethod, path: &Path) -> String {
        let message = format!("Dry run: skipping {} of {}", method, path.display());
        self.reporter.info(message.clone());
        message
    }
}

#[async_trait]
impl ClusterApi for DryRunCluster {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list(
        &self,
        kinds: &[ResourceKind],
        selector: Option<&str>,
    ) -> Result<Vec<LiveResource>> {
        self.inner.list(kinds, selector).await
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<LiveResource>> {
        self.inner.get(kind, name).await
    }

    async fn create(&self, path: &Path) -> Result<String> {
        Ok(self.skip(DeployMethod::Create, path))
    }

    async fn apply(&self, path: &Path) -> Result<String> {
        Ok(self.skip(DeployMethod::Apply, path))
    }

    async fn recreate(&self, path: &Path) -> Result<String> {
        Ok(self.skip(DeployMethod::Recreate, path))
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<()> {
        self.reporter
            .info(format!("Dry run: skipping delete of {kind}:{name}"));
        Ok(())
    }

    async fn events(&self) -> Result<Vec<ClusterEvent>> {
        self.inner.events().await
    }
}

//! Dependency resolution
//!
//! A manifest lists what it needs in its `convoy.io/depends-on` annotation.
//! Before it is deployed every dependency must exist and, outside of dry
//! runs, be ready.

use std::sync::Arc;

use convoy_core::{Manifest, ResourceKind, ResourceObject, ResourceRef};
use tokio::time::Instant;

use crate::availability::{Readiness, readiness};
use crate::cluster::ClusterApi;
use crate::error::{DeployError, Result};
use crate::events::Reporter;
use crate::options::DependencyOptions;

pub struct DependencyResolver {
    cluster: Arc<dyn ClusterApi>,
    options: DependencyOptions,
    reporter: Reporter,
}

impl DependencyResolver {
    pub fn new(cluster: Arc<dyn ClusterApi>, options: DependencyOptions, reporter: Reporter) -> Self {
        Self {
            cluster,
            options,
            reporter,
        }
    }

    /// True when the manifest declares at least one dependency
    pub fn has_dependencies(manifest: &Manifest) -> bool {
        !manifest.dependencies().is_empty()
    }

    /// Wait for every dependency of `manifest`
    ///
    /// Without `check_available` the references are checked once and missing
    /// ones are only reported, since a dry run never creates them.
    pub async fn ready(&self, manifest: &Manifest, check_available: bool) -> Result<()> {
        let dependencies = resolve_kinds(manifest.dependencies())?;
        if dependencies.is_empty() {
            return Ok(());
        }

        if !check_available {
            for (kind, name) in &dependencies {
                if !self.cluster.exists(*kind, name).await? {
                    self.reporter.warn(format!(
                        "Dependency {kind}:{name} of {} does not exist yet",
                        manifest.name()
                    ));
                }
            }
            return Ok(());
        }

        let deadline = Instant::now() + self.options.timeout;
        loop {
            match self.missing(&dependencies).await {
                Ok(None) => return Ok(()),
                Ok(Some((kind, name))) => self.reporter.debug(format!(
                    "{} waiting for dependency {kind}:{name}",
                    manifest.name()
                )),
                Err(e) => self
                    .reporter
                    .warn(format!("Failed to check dependencies of {}: {e}", manifest.name())),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DeployError::timeout(
                    format!("dependencies of {}", manifest.name()),
                    self.options.timeout,
                ));
            }
            tokio::time::sleep(self.options.wait.min(deadline - now)).await;
        }
    }

    /// First dependency that is missing or not ready
    async fn missing<'a>(
        &self,
        dependencies: &'a [(ResourceKind, String)],
    ) -> Result<Option<(ResourceKind, &'a str)>> {
        for (kind, name) in dependencies {
            let ready = match self.cluster.get(*kind, name).await? {
                Some(live) => readiness(*kind, &live) == Readiness::Ready,
                None => false,
            };
            if !ready {
                return Ok(Some((*kind, name.as_str())));
            }
        }
        Ok(None)
    }
}

fn resolve_kinds(refs: Vec<ResourceRef>) -> Result<Vec<(ResourceKind, String)>> {
    refs.into_iter()
        .map(|r| {
            let kind = r.kind.parse::<ResourceKind>().map_err(|_| {
                DeployError::InvalidConfig(format!("unsupported dependency kind '{}'", r.kind))
            })?;
            Ok((kind, r.name))
        })
        .collect()
}

//! Namespace bootstrap
//!
//! Namespaces declared under `<dir>/<cluster>/**/*.yaml` are created before
//! any manifest of the cluster is deployed. Existing namespaces are never
//! touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use convoy_core::{ResourceKind, ResourceObject, load_manifests};

use crate::cluster::ClusterApi;
use crate::error::{DeployError, Result};
use crate::events::Reporter;

pub struct NamespaceBootstrap {
    cluster: Arc<dyn ClusterApi>,
    dir: Option<PathBuf>,
    reporter: Reporter,
}

impl NamespaceBootstrap {
    pub fn new(cluster: Arc<dyn ClusterApi>, dir: Option<PathBuf>, reporter: Reporter) -> Self {
        Self {
            cluster,
            dir,
            reporter,
        }
    }

    /// Create the missing namespaces, returning their names
    ///
    /// Apply files are written to `tmp_dir`.
    pub async fn deploy(&self, tmp_dir: &Path) -> Result<Vec<String>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        let files = load_manifests(dir, self.cluster.name(), None)?;
        if files.is_empty() {
            self.reporter.debug(format!(
                "No namespace files to process, skipping {}",
                self.cluster.name()
            ));
            return Ok(Vec::new());
        }

        self.reporter.debug("Getting list of namespaces");
        let existing = self.cluster.list(&[ResourceKind::Namespace], None).await?;
        self.reporter
            .info(format!("Found {} namespaces", existing.len()));

        let mut created = Vec::new();
        let mut errors = Vec::new();
        for file in files {
            let name = file.manifest.name().to_string();
            if existing.iter().any(|ns| ns.name() == name) {
                continue;
            }
            self.reporter.info(format!("Create {name} namespace"));

            let path = tmp_dir.join(format!(
                "{}-namespace-{name}.json",
                self.cluster.name()
            ));
            let result: Result<String> = async {
                tokio::fs::write(&path, file.manifest.to_json()?).await?;
                self.cluster.create(&path).await
            }
            .await;
            match result {
                Ok(message) => {
                    self.reporter.info(message);
                    created.push(name);
                }
                Err(e) => {
                    self.reporter
                        .error(format!("Error creating namespace {name}: {e}"));
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(created)
        } else {
            Err(DeployError::Aggregate(errors))
        }
    }
}

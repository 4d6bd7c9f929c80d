//! File-system backup of applied manifests

use std::path::PathBuf;

use convoy_core::{Manifest, ResourceObject};

use crate::error::{DeployError, Result};
use crate::options::{BackupFormat, BackupOptions};

/// Writes `<dir>/<cluster>/<name>.<yaml|json>` for every applied manifest
#[derive(Debug, Clone)]
pub struct FileBackup {
    options: BackupOptions,
}

impl FileBackup {
    pub fn new(options: BackupOptions) -> Result<Self> {
        if options.enabled && options.dir.is_none() {
            return Err(DeployError::InvalidConfig(
                "backup is enabled but no backup directory is set".to_string(),
            ));
        }
        Ok(Self { options })
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Save one manifest, returning where it was written
    ///
    /// A disabled backup writes nothing and returns `None`.
    pub async fn save(&self, cluster: &str, manifest: &Manifest) -> Result<Option<PathBuf>> {
        let Some(dir) = self.options.dir.as_ref().filter(|_| self.options.enabled) else {
            return Ok(None);
        };
        let body = match self.options.format {
            BackupFormat::Yaml => serde_yaml::to_string(manifest)?,
            BackupFormat::Json => serde_json::to_string_pretty(manifest)?,
        };

        let cluster_dir = dir.join(cluster);
        tokio::fs::create_dir_all(&cluster_dir).await?;
        let path = cluster_dir.join(format!(
            "{}.{}",
            manifest.name(),
            self.options.format.extension()
        ));
        tokio::fs::write(&path, body).await?;
        tracing::debug!(cluster, path = %path.display(), "saved backup");
        Ok(Some(path))
    }
}

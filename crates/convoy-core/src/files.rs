//! Manifest and cluster config loading
//!
//! Manifests live under `<dir>/<cluster>/**/*.yaml`; each file may hold one
//! or more YAML documents. Cluster configs are kubeconfig files extended with
//! `kind: Config` and a `metadata.name` naming the cluster.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::manifest::{Manifest, ResourceObject};
use crate::selector;

/// A manifest and the file it was read from
#[derive(Debug, Clone)]
pub struct ManifestFile {
    pub path: PathBuf,
    pub manifest: Manifest,
}

impl ManifestFile {
    /// File name used to derive the temporary apply file
    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.manifest.name().to_string())
    }
}

/// Load every manifest for `cluster` whose labels match `selector`
///
/// A missing cluster directory yields no manifests.
pub fn load_manifests(
    dir: &Path,
    cluster: &str,
    selector: Option<&str>,
) -> Result<Vec<ManifestFile>> {
    let root = dir.join(cluster);
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(&root).follow_links(true) {
        let entry = entry.map_err(|e| CoreError::Io(e.into()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    let mut manifests = Vec::new();
    for path in paths {
        for manifest in read_documents(&path)? {
            let labels = manifest.labels();
            if selector::matches(Some(&labels), selector) {
                manifests.push(ManifestFile {
                    path: path.clone(),
                    manifest,
                });
            }
        }
    }
    Ok(manifests)
}

fn read_documents(path: &Path) -> Result<Vec<Manifest>> {
    let content = std::fs::read_to_string(path)?;
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = Value::deserialize(document).map_err(|e| CoreError::InvalidManifest {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        let manifest = Manifest::from_value(value).map_err(|e| CoreError::InvalidManifest {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        manifests.push(manifest);
    }
    Ok(manifests)
}

/// A validated cluster config file
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub path: PathBuf,
    pub document: Value,
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let document: Value = serde_yaml::from_str(&content)?;
        Self::from_value(path, document)
    }

    pub fn from_value(path: &Path, document: Value) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidClusterConfig {
            path: path.display().to_string(),
            message: message.to_string(),
        };

        if document.get("kind").and_then(Value::as_str) != Some("Config") {
            return Err(invalid("kind must be \"Config\""));
        }
        let name = document
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("metadata.name is required"))?
            .to_string();

        Ok(Self {
            name,
            path: path.to_path_buf(),
            document,
        })
    }
}

/// Load every cluster config matching a glob pattern, sorted by path
pub fn load_cluster_configs(pattern: &str) -> Result<Vec<ClusterConfig>> {
    let paths = glob::glob(pattern).map_err(|e| CoreError::GlobPattern {
        message: format!("invalid glob pattern '{}': {}", pattern, e),
    })?;

    let mut configs = Vec::new();
    for path in paths {
        let path = path.map_err(|e| CoreError::Io(e.into_error()))?;
        if path.is_file() {
            configs.push(ClusterConfig::load(&path)?);
        }
    }
    configs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_manifests_with_selector() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "prod/web/deployment.yaml",
            "kind: Deployment\nmetadata:\n  name: web\n  labels:\n    tier: frontend\n",
        );
        write(
            dir.path(),
            "prod/db.yaml",
            "kind: Service\nmetadata:\n  name: db\n  labels:\n    tier: backend\n",
        );
        write(dir.path(), "prod/notes.txt", "ignored");
        write(dir.path(), "staging/other.yaml", "kind: Secret\nmetadata:\n  name: s\n");

        let all = load_manifests(dir.path(), "prod", None).unwrap();
        assert_eq!(all.len(), 2);

        let frontend = load_manifests(dir.path(), "prod", Some("tier=frontend")).unwrap();
        assert_eq!(frontend.len(), 1);
        assert_eq!(frontend[0].manifest.name(), "web");
        assert_eq!(frontend[0].basename(), "deployment.yaml");
    }

    #[test]
    fn test_multi_document_file() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "c1/all.yaml",
            "kind: Secret\nmetadata:\n  name: a\n---\nkind: Secret\nmetadata:\n  name: b\n",
        );
        let manifests = load_manifests(dir.path(), "c1", None).unwrap();
        assert_eq!(manifests.len(), 2);
    }

    #[test]
    fn test_missing_cluster_dir() {
        let dir = TempDir::new().unwrap();
        assert!(load_manifests(dir.path(), "nope", None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_manifest_names_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "c1/bad.yaml", "kind: Secret\nmetadata: {}\n");
        let err = load_manifests(dir.path(), "c1", None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidManifest { path, .. } if path.ends_with("bad.yaml")));
    }

    #[test]
    fn test_cluster_config_validation() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.yaml", "kind: Config\nmetadata:\n  name: prod-east\n");
        write(dir.path(), "b.yaml", "kind: Pod\nmetadata:\n  name: x\n");
        write(dir.path(), "c.yaml", "kind: Config\nmetadata: {}\n");

        let config = ClusterConfig::load(&dir.path().join("a.yaml")).unwrap();
        assert_eq!(config.name, "prod-east");
        assert!(ClusterConfig::load(&dir.path().join("b.yaml")).is_err());
        assert!(matches!(
            ClusterConfig::load(&dir.path().join("c.yaml")),
            Err(CoreError::InvalidClusterConfig { .. })
        ));
    }

    #[test]
    fn test_load_cluster_configs_glob() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.yaml", "kind: Config\nmetadata:\n  name: b\n");
        write(dir.path(), "a.yaml", "kind: Config\nmetadata:\n  name: a\n");

        let pattern = format!("{}/*.yaml", dir.path().display());
        let configs = load_cluster_configs(&pattern).unwrap();
        let names: Vec<_> = configs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}

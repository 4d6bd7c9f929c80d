//! Deploy options
//!
//! Every field has a default so a partial YAML options file is enough.
//! Durations are human readable (`10m`, `30s`).

use std::path::PathBuf;
use std::time::Duration;

use convoy_core::StrategyKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOptions {
    /// Root of `<dir>/<cluster>/**/*.yaml` manifests
    #[serde(default = "default_manifests_dir")]
    pub manifests_dir: PathBuf,

    /// Root of `<dir>/<cluster>/**/*.yaml` namespace manifests
    #[serde(default)]
    pub namespaces_dir: Option<PathBuf>,

    /// Only deploy manifests whose labels match this selector
    #[serde(default)]
    pub selector: Option<String>,

    /// Commit sha being deployed
    #[serde(default)]
    pub sha: Option<String>,

    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default)]
    pub deploy_id: Option<String>,

    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub release_id: Option<String>,

    /// Log mutations instead of performing them
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Deploy even when nothing changed
    #[serde(default)]
    pub force: bool,

    /// Log the differences found for each manifest
    #[serde(default)]
    pub diff: bool,

    /// Never touch resources that already exist
    #[serde(default)]
    pub create_only: bool,

    /// Reported to webhooks as a revert
    #[serde(default)]
    pub is_rollback: bool,

    #[serde(default)]
    pub available: AvailableOptions,

    #[serde(default)]
    pub dependency: DependencyOptions,

    /// Interval between polls of a watched resource or the event list
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default)]
    pub github: GithubOptions,

    #[serde(default)]
    pub backup: BackupOptions,

    #[serde(default)]
    pub audit: AuditOptions,

    /// Webhook base URLs, the resource name is appended
    #[serde(default)]
    pub webhooks: Vec<String>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            manifests_dir: default_manifests_dir(),
            namespaces_dir: None,
            selector: None,
            sha: None,
            strategy: StrategyKind::default(),
            deploy_id: None,
            uuid: None,
            release_id: None,
            dry_run: true,
            force: false,
            diff: false,
            create_only: false,
            is_rollback: false,
            available: AvailableOptions::default(),
            dependency: DependencyOptions::default(),
            poll_interval: default_poll_interval(),
            github: GithubOptions::default(),
            backup: BackupOptions::default(),
            audit: AuditOptions::default(),
            webhooks: Vec::new(),
        }
    }
}

/// Availability checking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableOptions {
    #[serde(default)]
    pub enabled: bool,

    /// Also check resources that had no changes
    #[serde(default)]
    pub all: bool,

    /// Wait for availability before moving to the next step of a manifest
    #[serde(default)]
    pub required: bool,

    #[serde(default = "default_true")]
    pub health_check: bool,

    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub health_check_grace_period: Duration,

    /// Error count per object and reason tolerated before escalating
    #[serde(default = "default_threshold")]
    pub health_check_threshold: u32,

    #[serde(default)]
    pub keep_alive: bool,

    #[serde(default = "default_keep_alive_interval", with = "humantime_serde")]
    pub keep_alive_interval: Duration,

    #[serde(default = "default_available_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AvailableOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            all: false,
            required: false,
            health_check: true,
            health_check_grace_period: default_grace_period(),
            health_check_threshold: default_threshold(),
            keep_alive: false,
            keep_alive_interval: default_keep_alive_interval(),
            timeout: default_available_timeout(),
        }
    }
}

/// Dependency polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyOptions {
    #[serde(default = "default_dependency_wait", with = "humantime_serde")]
    pub wait: Duration,

    #[serde(default = "default_dependency_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DependencyOptions {
    fn default() -> Self {
        Self {
            wait: default_dependency_wait(),
            timeout: default_dependency_timeout(),
        }
    }
}

/// Commit lookup used to detect stale deploys
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_github_api")]
    pub api_url: String,
}

impl Default for GithubOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            user: None,
            repo: None,
            api_url: default_github_api(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFormat {
    #[default]
    Yaml,
    Json,
}

impl BackupFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BackupFormat::Yaml => "yaml",
            BackupFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub format: BackupFormat,
}

/// HTTP audit log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

fn default_manifests_dir() -> PathBuf {
    PathBuf::from("manifests")
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_threshold() -> u32 {
    1
}

fn default_keep_alive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_available_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_dependency_wait() -> Duration {
    Duration::from_secs(3)
}

fn default_dependency_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

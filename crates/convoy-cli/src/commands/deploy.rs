//! Deploy command - deploy manifests to every configured cluster

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use convoy_core::{StrategyKind, load_cluster_configs};
use convoy_kube::{BackupFormat, ClusterCoordinator, DeployOptions, KubeConnector, Reporter};

use crate::display::EventDisplay;
use crate::error::{CliError, Result};

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Glob matching the cluster config files
    #[arg(short, long, env = "CONVOY_CLUSTERS", default_value = "clusters/*.yaml")]
    pub clusters: String,

    /// YAML options file, flags override its values
    #[arg(long, env = "CONVOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Manifests directory (`<dir>/<cluster>/**/*.yaml`)
    #[arg(short, long, env = "CONVOY_MANIFESTS")]
    pub manifests: Option<PathBuf>,

    /// Namespaces directory (`<dir>/<cluster>/**/*.yaml`)
    #[arg(long, env = "CONVOY_NAMESPACES")]
    pub namespaces: Option<PathBuf>,

    /// Only deploy manifests matching this label selector
    #[arg(short = 'l', long, env = "CONVOY_SELECTOR")]
    pub selector: Option<String>,

    /// Commit sha being deployed
    #[arg(long, env = "CONVOY_SHA")]
    pub sha: Option<String>,

    /// rolling-update or fast-rollback
    #[arg(long, env = "CONVOY_STRATEGY")]
    pub strategy: Option<StrategyKind>,

    #[arg(long, env = "CONVOY_DEPLOY_ID")]
    pub deploy_id: Option<String>,

    #[arg(long, env = "CONVOY_UUID")]
    pub uuid: Option<String>,

    #[arg(long, env = "CONVOY_RELEASE_ID")]
    pub release_id: Option<String>,

    /// Make changes to the clusters (dry run otherwise)
    #[arg(long, env = "CONVOY_APPLY")]
    pub apply: bool,

    /// Deploy even when nothing changed
    #[arg(long, env = "CONVOY_FORCE")]
    pub force: bool,

    /// Log the differences found for each manifest
    #[arg(long, env = "CONVOY_DIFF")]
    pub diff: bool,

    /// Never touch resources that already exist
    #[arg(long, env = "CONVOY_CREATE_ONLY")]
    pub create_only: bool,

    /// Report this deploy to webhooks as a revert
    #[arg(long, env = "CONVOY_ROLLBACK")]
    pub rollback: bool,

    /// Wait for every deployed resource to be available
    #[arg(long, env = "CONVOY_AVAILABLE")]
    pub available: bool,

    /// Also wait for resources that did not change
    #[arg(long, env = "CONVOY_AVAILABLE_ALL")]
    pub available_all: bool,

    #[arg(long, env = "CONVOY_AVAILABLE_REQUIRED")]
    pub available_required: bool,

    /// Availability timeout (e.g. 10m)
    #[arg(long, env = "CONVOY_AVAILABLE_TIMEOUT", value_parser = parse_duration)]
    pub available_timeout: Option<Duration>,

    /// Do not fail on error events while waiting
    #[arg(long, env = "CONVOY_NO_HEALTH_CHECK")]
    pub no_health_check: bool,

    /// Log periodically while waiting
    #[arg(long, env = "CONVOY_KEEP_ALIVE")]
    pub keep_alive: bool,

    /// Dependency timeout (e.g. 10m)
    #[arg(long, env = "CONVOY_DEPENDENCY_TIMEOUT", value_parser = parse_duration)]
    pub dependency_timeout: Option<Duration>,

    /// Webhook base URL, the resource name is appended
    #[arg(long = "webhook", env = "CONVOY_WEBHOOKS", value_delimiter = ',')]
    pub webhooks: Vec<String>,

    /// Token for commit lookups, enables stale deploy detection
    #[arg(long, env = "CONVOY_GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    #[arg(long, env = "CONVOY_GITHUB_USER")]
    pub github_user: Option<String>,

    #[arg(long, env = "CONVOY_GITHUB_REPO")]
    pub github_repo: Option<String>,

    /// Save deployed manifests under this directory
    #[arg(long, env = "CONVOY_BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// yaml or json
    #[arg(long, env = "CONVOY_BACKUP_FORMAT", value_parser = parse_backup_format)]
    pub backup_format: Option<BackupFormat>,

    /// Audit log base URL
    #[arg(long, env = "CONVOY_AUDIT_URL")]
    pub audit_url: Option<String>,

    #[arg(long, env = "CONVOY_AUDIT_TOKEN", hide_env_values = true)]
    pub audit_token: Option<String>,

    /// Environment reported to the audit log
    #[arg(long, env = "CONVOY_ENVIRONMENT")]
    pub environment: Option<String>,
}

/// Run the deploy command
pub async fn run(args: DeployArgs, debug: bool) -> Result<()> {
    let options = resolve_options(&args)?;

    let configs = load_cluster_configs(&args.clusters)?;
    if configs.is_empty() {
        return Err(CliError::validation_with_help(
            format!("No cluster configs match '{}'", args.clusters),
            "Pass --clusters with a glob matching kubeconfig files that have kind: Config and metadata.name",
        ));
    }

    println!(
        "{} Deploying to {} with {}{}",
        style("→").blue().bold(),
        style(
            configs
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
        .cyan(),
        style(options.strategy).yellow(),
        if options.dry_run {
            style(" (dry run)").dim().to_string()
        } else {
            String::new()
        }
    );

    let (reporter, mut rx) = Reporter::channel();
    let display = tokio::spawn(async move {
        let mut display = EventDisplay::new(debug);
        while let Some(event) = rx.recv().await {
            display.render(&event);
        }
        display.finish();
    });

    let coordinator = ClusterCoordinator::new(options, Arc::new(KubeConnector), reporter);
    let result = coordinator.deploy(configs).await;
    drop(coordinator);
    if let Err(e) = display.await {
        tracing::warn!("event display stopped: {e}");
    }

    let snapshot = result?;
    println!(
        "{} Deployed to {}/{} clusters",
        style("✓").green().bold(),
        snapshot.clusters.successful.len(),
        snapshot.clusters.total
    );
    Ok(())
}

/// Options file (or defaults) with every flag applied on top
pub fn resolve_options(args: &DeployArgs) -> Result<DeployOptions> {
    if args.force && args.create_only {
        return Err(CliError::usage("--force and --create-only cannot be used together"));
    }
    let mut options = match &args.config {
        Some(path) => load_options(path)?,
        None => DeployOptions::default(),
    };
    apply_args(args, &mut options);
    Ok(options)
}

fn load_options(path: &Path) -> Result<DeployOptions> {
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| {
        CliError::validation_with_help(
            format!("Invalid options file {}: {e}", path.display()),
            "Options use camelCase keys, e.g. dryRun, available.timeout",
        )
    })
}

fn apply_args(args: &DeployArgs, options: &mut DeployOptions) {
    if let Some(dir) = &args.manifests {
        options.manifests_dir = dir.clone();
    }
    if args.namespaces.is_some() {
        options.namespaces_dir = args.namespaces.clone();
    }
    if args.selector.is_some() {
        options.selector = args.selector.clone();
    }
    if args.sha.is_some() {
        options.sha = args.sha.clone();
    }
    if let Some(strategy) = args.strategy {
        options.strategy = strategy;
    }
    if args.deploy_id.is_some() {
        options.deploy_id = args.deploy_id.clone();
    }
    if args.uuid.is_some() {
        options.uuid = args.uuid.clone();
    }
    if args.release_id.is_some() {
        options.release_id = args.release_id.clone();
    }

    options.dry_run &= !args.apply;
    options.force |= args.force;
    options.diff |= args.diff;
    options.create_only |= args.create_only;
    options.is_rollback |= args.rollback;

    let available = &mut options.available;
    available.enabled |= args.available || args.available_all || args.available_required;
    available.all |= args.available_all;
    available.required |= args.available_required;
    available.health_check &= !args.no_health_check;
    available.keep_alive |= args.keep_alive;
    if let Some(timeout) = args.available_timeout {
        available.timeout = timeout;
    }
    if let Some(timeout) = args.dependency_timeout {
        options.dependency.timeout = timeout;
    }

    options.webhooks.extend(args.webhooks.iter().cloned());

    let github = &mut options.github;
    if args.github_token.is_some() {
        github.token = args.github_token.clone();
        github.enabled = true;
    }
    if args.github_user.is_some() {
        github.user = args.github_user.clone();
    }
    if args.github_repo.is_some() {
        github.repo = args.github_repo.clone();
    }

    if args.backup_dir.is_some() {
        options.backup.dir = args.backup_dir.clone();
        options.backup.enabled = true;
    }
    if let Some(format) = args.backup_format {
        options.backup.format = format;
    }

    let audit = &mut options.audit;
    if args.audit_url.is_some() {
        audit.url = args.audit_url.clone();
        audit.enabled = true;
    }
    if args.audit_token.is_some() {
        audit.token = args.audit_token.clone();
    }
    if args.environment.is_some() {
        audit.environment = args.environment.clone();
    }
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_backup_format(s: &str) -> std::result::Result<BackupFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "yaml" | "yml" => Ok(BackupFormat::Yaml),
        "json" => Ok(BackupFormat::Json),
        other => Err(format!("unknown backup format '{other}', expected yaml or json")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: DeployArgs,
    }

    fn parse(argv: &[&str]) -> DeployArgs {
        let mut full = vec!["convoy"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_defaults_stay_dry() {
        let options = resolve_options(&parse(&[])).unwrap();
        assert!(options.dry_run);
        assert!(!options.available.enabled);
        assert!(!options.github.enabled);
    }

    #[test]
    fn test_flags_override_options() {
        let args = parse(&[
            "--apply",
            "--strategy",
            "fast-rollback",
            "--deploy-id",
            "dep-7",
            "--available-all",
            "--available-timeout",
            "2m",
            "--webhook",
            "https://hooks.example/a,https://hooks.example/b",
            "--backup-dir",
            "/var/backups",
            "--backup-format",
            "json",
        ]);
        let options = resolve_options(&args).unwrap();
        assert!(!options.dry_run);
        assert_eq!(options.strategy, StrategyKind::FastRollback);
        assert_eq!(options.deploy_id.as_deref(), Some("dep-7"));
        assert!(options.available.enabled);
        assert!(options.available.all);
        assert_eq!(options.available.timeout, Duration::from_secs(120));
        assert_eq!(options.webhooks.len(), 2);
        assert!(options.backup.enabled);
        assert_eq!(options.backup.format, BackupFormat::Json);
    }

    #[test]
    fn test_options_file_is_the_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convoy.yaml");
        std::fs::write(
            &path,
            "dryRun: false\nselector: tier=web\navailable:\n  enabled: true\n  timeout: 5m\n",
        )
        .unwrap();

        let path = path.to_string_lossy().into_owned();
        let options = resolve_options(&parse(&["--config", &path, "--diff"])).unwrap();
        assert!(!options.dry_run);
        assert!(options.diff);
        assert_eq!(options.selector.as_deref(), Some("tier=web"));
        assert_eq!(options.available.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_force_conflicts_with_create_only() {
        let err = resolve_options(&parse(&["--force", "--create-only"])).unwrap_err();
        assert_eq!(err.exit_code(), crate::exit_codes::USAGE_ERROR);
    }

    #[test]
    fn test_invalid_strategy_is_rejected() {
        assert!(TestCli::try_parse_from(["convoy", "--strategy", "blue-green"]).is_err());
    }
}

//! Multi-cluster fan-out
//!
//! Every cluster runs namespace bootstrap and then its own
//! [`ManifestOrchestrator`], all concurrently. A failing cluster never stops
//! the others; the run fails once they have all finished if any of them
//! failed.
//!
//! Orchestrators report into an internal channel. A single pump task drains
//! it, keeps [`ClusterProgress`] up to date from cluster status events,
//! forwards everything to the caller's [`Reporter`] and feeds the webhook
//! notifier, so deliveries keep the order the events were produced in.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use convoy_core::{Annotator, ClusterConfig};
use futures::future::join_all;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cluster::{ClusterApi, ClusterConnector, DryRunCluster};
use crate::error::{DeployError, Result};
use crate::events::{CLUSTER_KIND, DeployEvent, Phase, Reporter, Status, StatusEvent};
use crate::namespaces::NamespaceBootstrap;
use crate::options::DeployOptions;
use crate::orchestrator::ManifestOrchestrator;
use crate::progress::{ClusterProgress, ProgressSnapshot};
use crate::sinks::{GithubCommits, WebhookNotifier};

pub struct ClusterCoordinator {
    options: Arc<DeployOptions>,
    connector: Arc<dyn ClusterConnector>,
    reporter: Reporter,
}

impl ClusterCoordinator {
    pub fn new(
        options: DeployOptions,
        connector: Arc<dyn ClusterConnector>,
        reporter: Reporter,
    ) -> Self {
        Self {
            options: Arc::new(options),
            connector,
            reporter,
        }
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    /// Deploy to every cluster, returning the final progress
    pub async fn deploy(&self, configs: Vec<ClusterConfig>) -> Result<ProgressSnapshot> {
        if configs.is_empty() {
            self.reporter.warn("No cluster configs found, nothing to deploy");
            return Ok(ProgressSnapshot::default());
        }
        if self.options.dry_run {
            self.reporter
                .info("Dry run enabled, no changes will be made to any cluster");
        }

        let annotator = self.annotator().await?;

        let tmp_dir = tempfile::Builder::new()
            .prefix(&Uuid::new_v4().to_string())
            .rand_bytes(0)
            .tempdir()?;
        self.reporter
            .debug(format!("Writing apply files to {}", tmp_dir.path().display()));

        let mut progress = ClusterProgress::new();
        for config in &configs {
            progress.add(&config.name);
        }
        let webhook = if self.options.webhooks.is_empty() {
            None
        } else {
            Some(WebhookNotifier::new(
                self.options.webhooks.clone(),
                self.options.is_rollback,
                configs.iter().map(|c| c.name.clone()),
                self.reporter.clone(),
            )?)
        };

        let (internal, rx) = Reporter::channel();
        internal.progress(progress.snapshot());
        let pump = tokio::spawn(pump_events(rx, self.reporter.clone(), webhook, progress));

        let results = join_all(configs.iter().map(|config| {
            self.deploy_cluster(
                config,
                annotator.clone(),
                internal.for_cluster(&config.name),
                tmp_dir.path(),
            )
        }))
        .await;
        drop(internal);

        let snapshot = match pump.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.reporter
                    .warn(format!("Event forwarding stopped unexpectedly: {e}"));
                ProgressSnapshot::default()
            }
        };
        if let Err(e) = tmp_dir.close() {
            self.reporter
                .warn(format!("Unable to remove temporary apply files: {e}"));
        }

        let errors: Vec<DeployError> = results.into_iter().filter_map(|r| r.err()).collect();
        if errors.is_empty() {
            self.reporter.info(format!(
                "Deployed to {} clusters",
                snapshot.clusters.successful.len()
            ));
            Ok(snapshot)
        } else {
            Err(DeployError::Aggregate(errors))
        }
    }

    /// Annotator shared by every cluster of this run
    async fn annotator(&self) -> Result<Annotator> {
        let commits = GithubCommits::new(self.options.github.clone())?;
        let (commit, warning) = commits.resolve(self.options.sha.as_deref()).await;
        if let Some(warning) = warning {
            self.reporter.warn(warning);
        }
        Ok(Annotator::new(self.options.strategy)
            .with_deploy_id(self.options.deploy_id.clone())
            .with_uuid(self.options.uuid.clone())
            .with_release_id(self.options.release_id.clone())
            .with_commit(commit)
            .with_start(Utc::now()))
    }

    async fn deploy_cluster(
        &self,
        config: &ClusterConfig,
        annotator: Annotator,
        reporter: Reporter,
        tmp_dir: &Path,
    ) -> Result<()> {
        let prepared = self.prepare(config, &reporter, tmp_dir).await.and_then(|cluster| {
            ManifestOrchestrator::new(cluster, self.options.clone(), annotator, reporter.clone())
        });
        let orchestrator = match prepared {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                reporter.error(format!("Unable to prepare cluster {}: {e}", config.name));
                reporter.status(StatusEvent {
                    cluster: config.name.clone(),
                    name: config.name.clone(),
                    kind: CLUSTER_KIND.to_string(),
                    phase: Phase::Completed,
                    status: Status::Failure,
                    manifest: config.document.clone(),
                    reason: Some(e.reason().to_string()),
                });
                return Err(DeployError::Cluster {
                    cluster: config.name.clone(),
                    errors: vec![e],
                });
            }
        };

        orchestrator
            .with_document(config.document.clone())
            .deploy(tmp_dir)
            .await
    }

    /// Connect and create the cluster's namespaces
    async fn prepare(
        &self,
        config: &ClusterConfig,
        reporter: &Reporter,
        tmp_dir: &Path,
    ) -> Result<Arc<dyn ClusterApi>> {
        let mut cluster = self.connector.connect(config).await?;
        if self.options.dry_run {
            cluster = Arc::new(DryRunCluster::new(cluster, reporter.clone()));
        }
        NamespaceBootstrap::new(
            cluster.clone(),
            self.options.namespaces_dir.clone(),
            reporter.clone(),
        )
        .deploy(tmp_dir)
        .await?;
        Ok(cluster)
    }
}

async fn pump_events(
    mut rx: mpsc::UnboundedReceiver<DeployEvent>,
    outer: Reporter,
    mut webhook: Option<WebhookNotifier>,
    mut progress: ClusterProgress,
) -> ProgressSnapshot {
    while let Some(event) = rx.recv().await {
        let status = match event {
            DeployEvent::Status(status) => status,
            other => {
                outer.forward(other);
                continue;
            }
        };

        let finished = status.is_cluster() && status.phase == Phase::Completed;
        if finished {
            let snapshot = match status.status {
                Status::Success => progress.success(&status.cluster),
                _ => progress.fail(&status.cluster),
            };
            outer.forward(DeployEvent::Status(status.clone()));
            outer.forward(DeployEvent::Progress(snapshot));
        } else {
            outer.forward(DeployEvent::Status(status.clone()));
        }

        if let Some(webhook) = webhook.as_mut() {
            let snapshot = progress.snapshot();
            for notification in webhook.change(&status, &snapshot) {
                webhook.deliver(&notification).await;
            }
        }
    }
    progress.snapshot()
}

//! Per-cluster deploy
//!
//! The orchestrator drives every manifest of one cluster through:
//!
//! ```text
//! annotate -> diff -> skip check -> commit check -> dependencies
//!          -> pre-deploy -> create/apply/recreate -> availability -> backup
//! ```
//!
//! Planning (annotation, diff and skip decisions) finishes for the whole
//! cluster before anything is deployed. Manifests without dependencies are
//! deployed concurrently first; manifests declaring dependencies follow once
//! that batch has settled. A failing manifest never stops its siblings: errors
//! are collected and reported together at the end.
//!
//! Availability waits hold up a manifest only when `available.required` is
//! set. Other waits run after the last batch and an unavailable resource is a
//! warning that also skips cleanup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use convoy_core::{
    Annotator, CommitInfo, Differences, LiveResource, Manifest, ManifestFile, ResourceKind,
    ResourceObject, annotation, diff, load_manifests,
};
use futures::future::join_all;
use serde_json::Value;

use crate::availability::AvailabilityWatcher;
use crate::cluster::{ClusterApi, DeployMethod};
use crate::dependency::DependencyResolver;
use crate::error::{DeployError, Result};
use crate::events::{CLUSTER_KIND, Phase, Reporter, Status, StatusEvent};
use crate::options::DeployOptions;
use crate::sinks::{AuditLog, FileBackup};
use crate::strategy::{self, DeployStrategy};

/// Everything decided about one manifest before deploying it
#[derive(Debug, Clone)]
pub struct Plan {
    pub source: PathBuf,
    pub manifest: Manifest,
    pub kind: ResourceKind,
    pub found: Option<LiveResource>,
    pub differences: Differences,
    pub method: DeployMethod,
    pub skip: bool,
}

impl Plan {
    fn name(&self) -> &str {
        self.manifest.name()
    }
}

/// Availability wait that does not hold up the rest of the cluster
struct PendingCheck<'a> {
    plan: &'a Plan,
    since: Option<DateTime<Utc>>,
}

pub struct ManifestOrchestrator {
    cluster: Arc<dyn ClusterApi>,
    options: Arc<DeployOptions>,
    annotator: Annotator,
    document: Value,
    strategy: Box<dyn DeployStrategy>,
    dependencies: DependencyResolver,
    availability: AvailabilityWatcher,
    backup: FileBackup,
    audit: AuditLog,
    reporter: Reporter,
}

impl ManifestOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        options: Arc<DeployOptions>,
        annotator: Annotator,
        reporter: Reporter,
    ) -> Result<Self> {
        let strategy = strategy::for_kind(
            annotator.strategy(),
            cluster.clone(),
            annotator.deploy_id(),
            reporter.clone(),
        );
        let dependencies =
            DependencyResolver::new(cluster.clone(), options.dependency.clone(), reporter.clone());
        let availability = AvailabilityWatcher::new(
            cluster.clone(),
            options.available.clone(),
            options.poll_interval,
            reporter.clone(),
        );
        let backup = FileBackup::new(options.backup.clone())?;
        let audit = AuditLog::new(cluster.name(), options.audit.clone())?;
        Ok(Self {
            cluster,
            options,
            annotator,
            document: Value::Null,
            strategy,
            dependencies,
            availability,
            backup,
            audit,
            reporter,
        })
    }

    /// Cluster config document attached to cluster status events
    pub fn with_document(mut self, document: Value) -> Self {
        self.document = document;
        self
    }

    pub fn cluster_name(&self) -> &str {
        self.cluster.name()
    }

    /// Deploy every manifest of the cluster, writing apply files to `tmp_dir`
    pub async fn deploy(&self, tmp_dir: &Path) -> Result<()> {
        self.cluster_status(Phase::Started, Status::InProgress, None);

        let result = self.run(tmp_dir).await;

        match &result {
            Ok(()) => {
                self.cluster_status(Phase::Completed, Status::Success, None);
                if let Err(e) = self.audit.done().await {
                    self.reporter.warn(format!("Unable to close audit session: {e}"));
                }
            }
            Err(e) => {
                self.cluster_status(Phase::Completed, Status::Failure, Some(e.reason()));
                if let Err(audit) = self.audit.fail(&e.to_string()).await {
                    self.reporter
                        .warn(format!("Unable to record failure in audit log: {audit}"));
                }
            }
        }
        result
    }

    async fn run(&self, tmp_dir: &Path) -> Result<()> {
        let files = load_manifests(
            &self.options.manifests_dir,
            self.cluster_name(),
            self.options.selector.as_deref(),
        )?;
        if files.is_empty() {
            self.reporter.info(format!(
                "No cluster files to process, skipping {}",
                self.cluster_name()
            ));
            return Ok(());
        }

        let plans = self.plan(files).await?;
        let manifests: Vec<Manifest> = plans.iter().map(|p| p.manifest.clone()).collect();
        if let Err(e) = self.audit.start(&manifests).await {
            self.reporter.warn(format!("Unable to start audit session: {e}"));
        }

        let (independent, dependent): (Vec<_>, Vec<_>) = plans
            .iter()
            .partition(|plan| !DependencyResolver::has_dependencies(&plan.manifest));

        let mut errors = Vec::new();
        let mut pending = Vec::new();
        for batch in [independent, dependent] {
            let results = join_all(batch.into_iter().map(|plan| self.process(plan, tmp_dir))).await;
            for result in results {
                match result {
                    Ok(Some(check)) => pending.push(check),
                    Ok(None) => {}
                    Err(e) => {
                        self.reporter.error(e.to_string());
                        errors.push(e);
                    }
                }
            }
        }
        let unavailable = self.settle(pending).await;

        if self.options.dry_run {
            let deferred = self.strategy.deferred();
            if !deferred.is_empty() {
                self.reporter.info(format!(
                    "Dry run: services {} would be deployed once all deployments are available",
                    deferred.join(", ")
                ));
            }
        } else if errors.is_empty() {
            if let Err(e) = self.finish(&manifests, unavailable).await {
                self.reporter.error(e.to_string());
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DeployError::Cluster {
                cluster: self.cluster_name().to_string(),
                errors,
            })
        }
    }

    /// Await the availability checks that were not required, reporting
    /// failures as warnings; returns how many failed
    async fn settle(&self, pending: Vec<PendingCheck<'_>>) -> usize {
        let results = join_all(
            pending
                .iter()
                .map(|check| self.wait_available(check.plan, check.since)),
        )
        .await;
        let mut unavailable = 0;
        for (check, result) in pending.iter().zip(results) {
            if let Err(e) = result {
                self.reporter.warn(format!(
                    "{} {} is not available: {e}",
                    check.plan.kind,
                    check.plan.name()
                ));
                unavailable += 1;
            }
        }
        unavailable
    }

    /// Release deferred services and clean up once the cluster is deployed
    ///
    /// Old deployments are only removed after availability was confirmed for
    /// every resource.
    async fn finish(&self, manifests: &[Manifest], unavailable: usize) -> Result<()> {
        if !self.options.available.enabled {
            self.reporter.info(
                "Availability checking is disabled, deploying held back services without cleanup",
            );
            return self.strategy.release_deferred().await;
        }
        if unavailable > 0 {
            let deferred = self.strategy.deferred();
            self.reporter.warn(format!(
                "{unavailable} resources are not available, skipping cleanup{}",
                if deferred.is_empty() {
                    String::new()
                } else {
                    format!(" and keeping services {} as they are", deferred.join(", "))
                }
            ));
            return Ok(());
        }
        self.strategy.all_available(manifests).await
    }

    /// Annotate, diff and decide for every supported manifest
    pub async fn plan(&self, files: Vec<ManifestFile>) -> Result<Vec<Plan>> {
        let mut supported = Vec::new();
        for file in files {
            match file.manifest.kind().filter(ResourceKind::is_deployable) {
                Some(kind) => supported.push((kind, file)),
                None => self.reporter.warn(format!(
                    "Skipping {} because {} is unsupported",
                    file.manifest.name(),
                    file.manifest.kind_str()
                )),
            }
        }
        if supported.is_empty() {
            return Ok(Vec::new());
        }

        let kinds: Vec<ResourceKind> = supported
            .iter()
            .map(|(kind, _)| *kind)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let kind_list: Vec<&str> = kinds.iter().map(ResourceKind::as_str).collect();
        match &self.options.selector {
            Some(selector) => self.reporter.info(format!(
                "Getting list of {} matching '{selector}'",
                kind_list.join(",")
            )),
            None => self
                .reporter
                .info(format!("Getting list of {}", kind_list.join(","))),
        }
        let existing = self
            .cluster
            .list(&kinds, self.options.selector.as_deref())
            .await?;
        self.reporter
            .info(format!("Found {} resources", existing.len()));

        let mut plans = Vec::with_capacity(supported.len());
        for (kind, file) in supported {
            let declared = file.manifest.value().clone();
            let mut manifest = file.manifest;
            self.annotator.annotate(&mut manifest)?;
            self.strategy.annotate(&mut manifest)?;

            let found = existing
                .iter()
                .find(|live| live.kind() == Some(kind) && live.name() == manifest.name())
                .cloned();
            let differences = match &found {
                Some(live) => diff::diff(live.last_applied_configuration().as_ref(), &declared),
                None => diff::diff(None, &declared),
            };
            if self.options.diff && found.is_some() && !differences.is_empty() {
                self.log_differences(&manifest, found.as_ref(), &declared, &differences);
            }

            let mut skip = self
                .strategy
                .skip_deploy(&manifest, found.as_ref(), &differences);
            if self.options.create_only && found.is_some() {
                self.reporter.info(format!(
                    "Skipping {} because it already exists and only creating",
                    manifest.name()
                ));
                skip = true;
            }
            if self.options.force {
                skip = false;
            }

            plans.push(Plan {
                source: file.path,
                method: DeployMethod::decide(kind, found.is_some()),
                manifest,
                kind,
                found,
                differences,
                skip,
            });
        }
        Ok(plans)
    }

    fn log_differences(
        &self,
        manifest: &Manifest,
        found: Option<&LiveResource>,
        declared: &Value,
        differences: &Differences,
    ) {
        let records = serde_json::to_string_pretty(differences).unwrap_or_default();
        self.reporter
            .info(format!("Differences for {}: {records}", manifest.name()));
        let previous = found.and_then(LiveResource::last_applied_configuration);
        self.reporter
            .info(diff::render(previous.as_ref(), declared));
    }

    async fn process<'a>(
        &self,
        plan: &'a Plan,
        tmp_dir: &Path,
    ) -> Result<Option<PendingCheck<'a>>> {
        if plan.skip {
            self.verify_unchanged(plan).await
        } else {
            self.deploy_manifest(plan, tmp_dir).await
        }
    }

    /// Nothing to deploy; optionally confirm the live resource is available
    async fn verify_unchanged<'a>(&self, plan: &'a Plan) -> Result<Option<PendingCheck<'a>>> {
        if self.options.dry_run || !self.options.available.all {
            return Ok(None);
        }
        self.status(plan, Phase::Started, Status::InProgress, None);
        self.check_available(plan, None).await
    }

    async fn deploy_manifest<'a>(
        &self,
        plan: &'a Plan,
        tmp_dir: &Path,
    ) -> Result<Option<PendingCheck<'a>>> {
        if self.is_stale(plan) {
            self.reporter.warn(format!(
                "Skipping {} because cluster has newer commit",
                plan.name()
            ));
            return Ok(None);
        }

        let path = self.apply_path(plan, tmp_dir);
        tokio::fs::write(&path, plan.manifest.to_json()?).await?;

        self.dependencies
            .ready(&plan.manifest, !self.options.dry_run)
            .await?;

        let deferred = self
            .strategy
            .pre_deploy(&plan.manifest, plan.found.is_some(), &plan.differences, &path)
            .await?;
        if deferred {
            return Ok(None);
        }

        self.reporter.info(format!("{} {}", plan.method, plan.name()));
        let deployed_at = Utc::now();
        let message = self.cluster.deploy(plan.method, &path).await?;
        self.reporter.info(message);
        if self.options.dry_run {
            return Ok(None);
        }

        self.status(plan, Phase::Started, Status::InProgress, None);
        let pending = self.check_available(plan, Some(deployed_at)).await?;
        self.save_backup(plan).await;
        Ok(pending)
    }

    /// Wait now when availability is required, otherwise hand the check back
    async fn check_available<'a>(
        &self,
        plan: &'a Plan,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<PendingCheck<'a>>> {
        if !self.options.available.enabled {
            return Ok(None);
        }
        if self.options.available.required {
            self.wait_available(plan, since).await?;
            return Ok(None);
        }
        Ok(Some(PendingCheck { plan, since }))
    }

    async fn wait_available(&self, plan: &Plan, since: Option<DateTime<Utc>>) -> Result<()> {
        match self
            .availability
            .available_since(plan.kind, plan.name(), since)
            .await
        {
            Ok(_) => {
                self.status(plan, Phase::Completed, Status::Success, None);
                Ok(())
            }
            Err(e) => {
                self.status(plan, Phase::Completed, Status::Failure, Some(e.reason()));
                Err(e)
            }
        }
    }

    /// The live resource was deployed from a commit newer than ours
    fn is_stale(&self, plan: &Plan) -> bool {
        plan.found
            .as_ref()
            .and_then(|live| live.annotation(annotation::COMMIT))
            .and_then(CommitInfo::from_annotation)
            .is_some_and(|live| self.annotator.commit().is_older_than(&live))
    }

    fn apply_path(&self, plan: &Plan, tmp_dir: &Path) -> PathBuf {
        let basename = plan
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tmp_dir.join(format!(
            "{}-{basename}-{}-{}.json",
            self.cluster_name(),
            plan.kind.as_str().to_ascii_lowercase(),
            plan.name()
        ))
    }

    async fn save_backup(&self, plan: &Plan) {
        match self.backup.save(self.cluster_name(), &plan.manifest).await {
            Ok(Some(path)) => self
                .reporter
                .info(format!("Backed up {} to {}", plan.name(), path.display())),
            Ok(None) => self
                .reporter
                .debug(format!("No backup of {}", plan.name())),
            Err(e) => self.reporter.warn(format!(
                "Unable to back up {} of {}: {e}",
                plan.name(),
                self.cluster_name()
            )),
        }
    }

    fn status(&self, plan: &Plan, phase: Phase, status: Status, reason: Option<&str>) {
        self.reporter.status(StatusEvent {
            cluster: self.cluster_name().to_string(),
            name: plan.name().to_string(),
            kind: plan.kind.to_string(),
            phase,
            status,
            manifest: plan.manifest.value().clone(),
            reason: reason.map(str::to_string),
        });
    }

    fn cluster_status(&self, phase: Phase, status: Status, reason: Option<&str>) {
        self.reporter.status(StatusEvent {
            cluster: self.cluster_name().to_string(),
            name: self.cluster_name().to_string(),
            kind: CLUSTER_KIND.to_string(),
            phase,
            status,
            manifest: self.document.clone(),
            reason: reason.map(str::to_string),
        });
    }
}

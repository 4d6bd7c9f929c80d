//! Availability watching
//!
//! A resource is polled until its kind specific readiness predicate holds.
//! The health monitor runs alongside as a second failure source and a single
//! deadline bounds the whole wait. Whichever finishes first wins and
//! everything else is stopped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use convoy_core::{LiveResource, ResourceKind, ResourceObject, int_at};
use tokio::time::{Instant, MissedTickBehavior};

use crate::cluster::ClusterApi;
use crate::error::{DeployError, Result};
use crate::events::Reporter;
use crate::health::{HealthConfig, HealthMonitor};
use crate::options::AvailableOptions;
use crate::watch::ResourceWatcher;

/// Result of checking one observation of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Waiting,
    /// Deployment paused, never going to progress
    Paused,
}

/// Readiness predicate for each kind
pub fn readiness(kind: ResourceKind, resource: &LiveResource) -> Readiness {
    let value = resource.value();
    match kind {
        ResourceKind::Deployment => {
            if value
                .pointer("/spec/paused")
                .and_then(|p| p.as_bool())
                .unwrap_or(false)
            {
                return Readiness::Paused;
            }
            let generation = int_at(value, "/metadata/generation");
            let observed = int_at(value, "/status/observedGeneration");
            let available = int_at(value, "/status/availableReplicas");
            let replicas = int_at(value, "/status/replicas");
            let unavailable = int_at(value, "/status/unavailableReplicas").unwrap_or(0);

            match (generation, observed, available, replicas) {
                (Some(generation), Some(observed), Some(available), Some(replicas))
                    if unavailable == 0 && observed >= generation && available >= replicas =>
                {
                    Readiness::Ready
                }
                _ => Readiness::Waiting,
            }
        }
        ResourceKind::DaemonSet => {
            let desired = int_at(value, "/status/desiredNumberScheduled");
            let current = int_at(value, "/status/currentNumberScheduled");
            match (desired, current) {
                (Some(desired), Some(current)) if desired <= current => Readiness::Ready,
                _ => Readiness::Waiting,
            }
        }
        kind if kind.is_job_like() => match int_at(value, "/status/succeeded") {
            Some(succeeded) if succeeded >= 1 => Readiness::Ready,
            _ => Readiness::Waiting,
        },
        _ => Readiness::Ready,
    }
}

fn describe(kind: ResourceKind, resource: &LiveResource) -> Option<String> {
    let value = resource.value();
    match kind {
        ResourceKind::Deployment => Some(format!(
            "{}/{} replicas available, {} unavailable, generation {}/{}",
            int_at(value, "/status/availableReplicas")?,
            int_at(value, "/status/replicas")?,
            int_at(value, "/status/unavailableReplicas").unwrap_or(0),
            int_at(value, "/status/observedGeneration")?,
            int_at(value, "/metadata/generation")?,
        )),
        ResourceKind::DaemonSet => Some(format!(
            "{}/{} scheduled",
            int_at(value, "/status/currentNumberScheduled")?,
            int_at(value, "/status/desiredNumberScheduled")?,
        )),
        kind if kind.is_job_like() => Some(format!(
            "{}/1 succeeded",
            int_at(value, "/status/succeeded")?
        )),
        _ => None,
    }
}

pub struct AvailabilityWatcher {
    cluster: Arc<dyn ClusterApi>,
    options: AvailableOptions,
    poll_interval: Duration,
    reporter: Reporter,
}

impl AvailabilityWatcher {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        options: AvailableOptions,
        poll_interval: Duration,
        reporter: Reporter,
    ) -> Self {
        Self {
            cluster,
            options,
            poll_interval,
            reporter,
        }
    }

    /// Wait until `kind:name` is available
    ///
    /// With `differences` the health check only considers events from now
    /// on; otherwise the resource is being re-checked and every event counts.
    pub async fn available(
        &self,
        kind: ResourceKind,
        name: &str,
        differences: bool,
    ) -> Result<LiveResource> {
        self.available_since(kind, name, differences.then(Utc::now))
            .await
    }

    /// Wait until `kind:name` is available, health checking events seen
    /// since `since` (every event when `None`)
    pub async fn available_since(
        &self,
        kind: ResourceKind,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<LiveResource> {
        let what = format!("{kind}:{name}");
        let deadline = Instant::now() + self.options.timeout;
        let mut watcher =
            ResourceWatcher::new(self.cluster.clone(), kind, name, self.poll_interval);

        let mut health = self.options.health_check.then(|| {
            HealthMonitor::start(
                self.cluster.clone(),
                name,
                HealthConfig {
                    grace_period: self.options.health_check_grace_period,
                    threshold: self.options.health_check_threshold,
                    poll_interval: self.poll_interval,
                },
                since,
                self.reporter.clone(),
            )
        });

        let mut keep_alive = tokio::time::interval_at(
            Instant::now() + self.options.keep_alive_interval,
            self.options.keep_alive_interval,
        );
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.reporter
            .info(format!("Waiting for {what} to be available..."));

        let result = loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    break Err(DeployError::timeout(what.clone(), self.options.timeout));
                }
                err = health_failure(health.as_mut()) => break Err(err),
                _ = keep_alive.tick(), if self.options.keep_alive => {
                    self.reporter
                        .info(format!("Still waiting for {what} to be available..."));
                }
                change = watcher.changed() => match change {
                    Ok(live) => {
                        if let Some(detail) = describe(kind, &live) {
                            self.reporter.debug(format!("{what} has {detail}"));
                        }
                        match readiness(kind, &live) {
                            Readiness::Ready => break Ok(live),
                            Readiness::Paused => {
                                break Err(DeployError::Paused {
                                    kind: kind.to_string(),
                                    name: name.to_string(),
                                });
                            }
                            Readiness::Waiting => {}
                        }
                    }
                    Err(e) => self.reporter.warn(format!("Failed to poll {what}: {e}")),
                },
            }
        };

        if let Some(monitor) = &health {
            monitor.stop();
        }

        match &result {
            Ok(_) => self.reporter.info(format!("{what} is available")),
            Err(e) => self.reporter.error(e.to_string()),
        }
        result
    }
}

async fn health_failure(monitor: Option<&mut HealthMonitor>) -> DeployError {
    match monitor {
        Some(monitor) => monitor.failed().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterEvent, MockCluster};
    use serde_json::{Value, json};

    fn live(value: Value) -> LiveResource {
        LiveResource::new(value)
    }

    fn deployment(status: Value) -> Value {
        json!({
            "kind": "Deployment",
            "metadata": { "name": "web", "generation": 2 },
            "spec": { "replicas": 1 },
            "status": status,
        })
    }

    #[test]
    fn test_deployment_readiness() {
        let ready = live(deployment(json!({
            "observedGeneration": 2, "replicas": 1, "availableReplicas": 1
        })));
        assert_eq!(readiness(ResourceKind::Deployment, &ready), Readiness::Ready);

        let stale = live(deployment(json!({
            "observedGeneration": 1, "replicas": 1, "availableReplicas": 1
        })));
        assert_eq!(readiness(ResourceKind::Deployment, &stale), Readiness::Waiting);

        let unavailable = live(deployment(json!({
            "observedGeneration": 2, "replicas": 2, "availableReplicas": 2,
            "unavailableReplicas": 1
        })));
        assert_eq!(
            readiness(ResourceKind::Deployment, &unavailable),
            Readiness::Waiting
        );

        // Missing fields mean not ready yet, not an error
        let empty = live(deployment(json!({})));
        assert_eq!(readiness(ResourceKind::Deployment, &empty), Readiness::Waiting);
    }

    #[test]
    fn test_paused_deployment() {
        let mut value = deployment(json!({
            "observedGeneration": 2, "replicas": 1, "availableReplicas": 1
        }));
        value["spec"]["paused"] = json!(true);
        assert_eq!(
            readiness(ResourceKind::Deployment, &live(value)),
            Readiness::Paused
        );
    }

    #[test]
    fn test_other_kinds_readiness() {
        let job = live(json!({ "kind": "Job", "status": { "succeeded": 1 } }));
        assert_eq!(readiness(ResourceKind::Job, &job), Readiness::Ready);
        let running = live(json!({ "kind": "Job", "status": { "active": 1 } }));
        assert_eq!(readiness(ResourceKind::CronJob, &running), Readiness::Waiting);

        let ds = live(json!({ "status": {
            "desiredNumberScheduled": 3, "currentNumberScheduled": 3
        }}));
        assert_eq!(readiness(ResourceKind::DaemonSet, &ds), Readiness::Ready);
        let partial = live(json!({ "status": {
            "desiredNumberScheduled": 3, "currentNumberScheduled": 2
        }}));
        assert_eq!(readiness(ResourceKind::DaemonSet, &partial), Readiness::Waiting);

        let service = live(json!({ "kind": "Service" }));
        for kind in [
            ResourceKind::Service,
            ResourceKind::Secret,
            ResourceKind::Ingress,
            ResourceKind::PersistentVolumeClaim,
        ] {
            assert_eq!(readiness(kind, &service), Readiness::Ready);
        }
    }

    fn options(timeout: u64) -> AvailableOptions {
        AvailableOptions {
            enabled: true,
            timeout: Duration::from_secs(timeout),
            ..Default::default()
        }
    }

    fn watcher(cluster: &MockCluster, options: AvailableOptions) -> AvailabilityWatcher {
        AvailabilityWatcher::new(
            Arc::new(cluster.clone()),
            options,
            Duration::from_secs(3),
            Reporter::silent(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_available_after_status_change() {
        let cluster = MockCluster::new("east");
        cluster.insert(deployment(json!({})));
        let availability = watcher(&cluster, options(60));

        let later = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            later.set_status(
                ResourceKind::Deployment,
                "web",
                json!({ "observedGeneration": 2, "replicas": 1, "availableReplicas": 1 }),
            );
        });

        let resource = availability
            .available(ResourceKind::Deployment, "web", true)
            .await
            .unwrap();
        assert_eq!(resource.value()["status"]["availableReplicas"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_available_times_out() {
        let cluster = MockCluster::new("east");
        cluster.insert(deployment(json!({})));
        let availability = watcher(&cluster, options(30));

        let started = Instant::now();
        let err = availability
            .available(ResourceKind::Deployment, "web", true)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "TimeoutError");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_fails_immediately() {
        let cluster = MockCluster::new("east");
        let mut value = deployment(json!({}));
        value["spec"]["paused"] = json!(true);
        cluster.insert(value);
        let availability = watcher(&cluster, options(600));

        let started = Instant::now();
        let err = availability
            .available(ResourceKind::Deployment, "web", true)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "PauseError");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_error_fails_watch() {
        let cluster = MockCluster::new("east");
        cluster.insert(deployment(json!({})));
        for count in 1..=2 {
            cluster.push_event(ClusterEvent {
                uid: "e1".into(),
                event_type: "Warning".into(),
                reason: "CrashLoopBackOff".into(),
                object_name: "web-5d8f-abc".into(),
                count,
                ..Default::default()
            });
        }
        let availability = watcher(&cluster, options(600));

        let err = availability
            .available(ResourceKind::Deployment, "web", false)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "EventError");
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_are_available_on_first_observation() {
        let cluster = MockCluster::new("east");
        cluster.insert(json!({ "kind": "Service", "metadata": { "name": "web" } }));
        let mut opts = options(600);
        opts.health_check = false;
        let availability = watcher(&cluster, opts);

        availability
            .available(ResourceKind::Service, "web", true)
            .await
            .unwrap();
        assert_eq!(cluster.operation_counts().events, 0);
    }
}

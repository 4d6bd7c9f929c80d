//! Event based health monitoring
//!
//! Kubernetes reports many transient errors that heal by themselves. The
//! monitor counts error events per object and reason, and only when a count
//! goes over the threshold does it arm a grace period timer. A recovery
//! signal for that object before the timer fires disarms it; otherwise the
//! triggering event is escalated as [`DeployError::HealthCheck`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterApi, ClusterEvent};
use crate::error::DeployError;
use crate::events::Reporter;
use crate::watch::EventWatcher;

/// Reasons that always count as errors, even on Normal events
pub const ERROR_REASONS: &[&str] = &[
    "BackOff",
    "CrashLoopBackOff",
    "ErrImagePull",
    "ImagePullBackOff",
    "InspectFailed",
    "Failed",
    "FailedCreate",
    "FailedMount",
    "FailedScheduling",
    "FailedSync",
];

/// Probe noise during startup and shutdown
pub const EXCLUDED_REASONS: &[&str] = &["Unhealthy", "ProbeWarning"];

pub const KILLING_REASON: &str = "Killing";

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub grace_period: Duration,
    pub threshold: u32,
    pub poll_interval: Duration,
}

/// What the monitor should do after observing one event
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Ignore,
    /// Start the grace period for this event
    Arm(ClusterEvent),
    /// Disarm the pending escalation
    Cancel,
}

/// Classification state for one monitoring session
#[derive(Debug, Default)]
pub struct HealthState {
    prefix: String,
    threshold: u32,
    errors: HashMap<String, HashMap<String, u32>>,
    being_killed: HashSet<String>,
    pending: Option<String>,
}

impl HealthState {
    pub fn new(prefix: impl Into<String>, threshold: u32) -> Self {
        Self {
            prefix: prefix.into(),
            threshold,
            ..Default::default()
        }
    }

    /// Object whose error is waiting out the grace period
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn observe(&mut self, event: &ClusterEvent) -> Verdict {
        if event.event_type.is_empty() || event.reason.is_empty() {
            return Verdict::Ignore;
        }
        let object = event.object_name.as_str();
        if !object.starts_with(&self.prefix) {
            return Verdict::Ignore;
        }

        if event.is_normal() && event.reason == KILLING_REASON {
            self.being_killed.insert(object.to_string());
            return self.cancel_for(object);
        }
        if self.being_killed.contains(object) {
            return if event.is_normal() {
                self.cancel_for(object)
            } else {
                Verdict::Ignore
            };
        }
        if EXCLUDED_REASONS.contains(&event.reason.as_str()) {
            return Verdict::Ignore;
        }
        if event.is_normal() && !ERROR_REASONS.contains(&event.reason.as_str()) {
            return Verdict::Ignore;
        }

        let count = self
            .errors
            .entry(object.to_string())
            .or_default()
            .entry(event.reason.clone())
            .or_insert(0);
        *count += 1;

        if *count > self.threshold && self.pending.is_none() {
            self.pending = Some(object.to_string());
            Verdict::Arm(event.clone())
        } else {
            Verdict::Ignore
        }
    }

    fn cancel_for(&mut self, object: &str) -> Verdict {
        if self.pending.as_deref() == Some(object) {
            self.pending = None;
            Verdict::Cancel
        } else {
            Verdict::Ignore
        }
    }
}

/// Running monitor for one resource name prefix
///
/// Dropping the handle stops the monitor.
pub struct HealthMonitor {
    token: CancellationToken,
    failure: Option<oneshot::Receiver<DeployError>>,
}

impl HealthMonitor {
    /// Start watching events for objects whose name starts with `prefix`
    pub fn start(
        cluster: Arc<dyn ClusterApi>,
        prefix: &str,
        config: HealthConfig,
        since: Option<DateTime<Utc>>,
        reporter: Reporter,
    ) -> Self {
        let token = CancellationToken::new();
        let (tx, failure) = oneshot::channel();
        let watcher = EventWatcher::new(cluster, config.poll_interval, since);
        let state = HealthState::new(prefix, config.threshold);

        tokio::spawn(run(
            watcher,
            state,
            config.grace_period,
            token.clone(),
            tx,
            reporter,
        ));

        Self {
            token,
            failure: Some(failure),
        }
    }

    /// Resolves with the escalated error; never resolves once stopped
    pub async fn failed(&mut self) -> DeployError {
        if let Some(failure) = self.failure.as_mut() {
            let received = failure.await;
            self.failure = None;
            if let Ok(err) = received {
                return err;
            }
        }
        std::future::pending().await
    }

    /// Safe to call any number of times
    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    mut watcher: EventWatcher,
    mut state: HealthState,
    grace_period: Duration,
    token: CancellationToken,
    tx: oneshot::Sender<DeployError>,
    reporter: Reporter,
) {
    let mut armed: Option<(Instant, ClusterEvent)> = None;

    loop {
        let deadline = armed.as_ref().map(|(at, _)| *at);
        tokio::select! {
            _ = token.cancelled() => return,
            _ = sleep_until(deadline) => {
                if let Some((_, event)) = armed.take() {
                    let name = state.pending().unwrap_or_default().to_string();
                    // Nobody listening means the watch already ended
                    let _ = tx.send(DeployError::HealthCheck {
                        name,
                        event: Box::new(event),
                    });
                }
                return;
            }
            next = watcher.next() => match next {
                Ok(event) => match state.observe(&event) {
                    Verdict::Arm(event) => {
                        reporter.debug(format!(
                            "{} reported {}: {}, waiting {:?} for recovery",
                            event.object_name, event.reason, event.message, grace_period
                        ));
                        armed = Some((Instant::now() + grace_period, event));
                    }
                    Verdict::Cancel => {
                        reporter.debug(format!("{} recovered", event.object_name));
                        armed = None;
                    }
                    Verdict::Ignore => {}
                },
                Err(e) => reporter.warn(format!("Failed to read cluster events: {e}")),
            },
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

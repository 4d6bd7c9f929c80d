//! Build-style webhook notifications
//!
//! Status events are aggregated per resource across clusters: `STARTED` is
//! sent the first time any cluster starts a resource, `COMPLETED` once every
//! cluster has either completed it or finished altogether.

use std::collections::{BTreeMap, BTreeSet};

use convoy_core::annotation;
use serde::Serialize;
use serde_json::Value;

use super::http_client;
use crate::error::Result;
use crate::events::{Phase, Reporter, Status, StatusEvent};
use crate::progress::ProgressSnapshot;

const PAYLOAD_NAME: &str = "kubernetes-deploy";
const PROVIDER: &str = "convoy";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub name: String,
    pub provider: String,
    pub build: Build,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Build {
    pub phase: Phase,
    pub status: Status,
    pub parameters: Parameters,
    pub progress: ProgressSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Parameters {
    pub revert: String,
}

#[derive(Debug, Default)]
struct ResourceState {
    started: BTreeSet<String>,
    completed: BTreeMap<String, Status>,
    sent_started: bool,
    sent_completed: bool,
}

/// A notification ready to be delivered for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub resource: String,
    pub payload: WebhookPayload,
}

pub struct WebhookNotifier {
    urls: Vec<String>,
    is_rollback: bool,
    clusters: BTreeSet<String>,
    finished: BTreeSet<String>,
    resources: BTreeMap<String, ResourceState>,
    client: reqwest::Client,
    reporter: Reporter,
}

impl WebhookNotifier {
    pub fn new(
        urls: Vec<String>,
        is_rollback: bool,
        clusters: impl IntoIterator<Item = String>,
        reporter: Reporter,
    ) -> Result<Self> {
        Ok(Self {
            urls,
            is_rollback,
            clusters: clusters.into_iter().collect(),
            finished: BTreeSet::new(),
            resources: BTreeMap::new(),
            client: http_client()?,
            reporter,
        })
    }

    /// Name reported for a resource: alias, then original name, then name
    pub fn resource_name(manifest: &Value) -> String {
        let annotations = manifest.pointer("/metadata/annotations");
        let lookup = |key: &str| {
            annotations
                .and_then(|a| a.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        lookup(annotation::ALIAS_NAME)
            .or_else(|| lookup(annotation::ORIGINAL_NAME))
            .or_else(|| {
                manifest
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default()
    }

    /// Fold one status event in, returning what should be sent now
    pub fn change(&mut self, event: &StatusEvent, progress: &ProgressSnapshot) -> Vec<Notification> {
        if event.is_cluster() {
            if event.phase == Phase::Completed {
                self.finished.insert(event.name.clone());
                let names: Vec<_> = self.resources.keys().cloned().collect();
                return names
                    .into_iter()
                    .filter_map(|name| self.try_complete(&name, progress))
                    .collect();
            }
            return Vec::new();
        }

        let name = Self::resource_name(&event.manifest);
        let state = self.resources.entry(name.clone()).or_default();
        match event.phase {
            Phase::Started => {
                state.started.insert(event.cluster.clone());
                if state.sent_started {
                    return Vec::new();
                }
                state.sent_started = true;
                vec![self.notification(&name, Phase::Started, Status::InProgress, progress)]
            }
            Phase::Completed => {
                state.started.insert(event.cluster.clone());
                state.completed.insert(event.cluster.clone(), event.status);
                self.try_complete(&name, progress).into_iter().collect()
            }
        }
    }

    fn try_complete(&mut self, name: &str, progress: &ProgressSnapshot) -> Option<Notification> {
        let state = self.resources.get_mut(name)?;
        if state.sent_completed || state.completed.is_empty() {
            return None;
        }
        let settled = |cluster: &String| {
            state.completed.contains_key(cluster) || self.finished.contains(cluster)
        };
        if !state.started.iter().all(|c| state.completed.contains_key(c))
            || !self.clusters.iter().all(settled)
        {
            return None;
        }
        state.sent_completed = true;
        let status = if state.completed.values().all(|s| *s == Status::Success) {
            Status::Success
        } else {
            Status::Failure
        };
        Some(self.notification(name, Phase::Completed, status, progress))
    }

    fn notification(
        &self,
        name: &str,
        phase: Phase,
        status: Status,
        progress: &ProgressSnapshot,
    ) -> Notification {
        Notification {
            resource: name.to_string(),
            payload: WebhookPayload {
                name: PAYLOAD_NAME.to_string(),
                provider: PROVIDER.to_string(),
                build: Build {
                    phase,
                    status,
                    parameters: Parameters {
                        revert: self.is_rollback.to_string(),
                    },
                    progress: progress.clone(),
                },
            },
        }
    }

    /// POST a notification to every configured URL; failures are only logged
    pub async fn deliver(&self, notification: &Notification) {
        for url in &self.urls {
            let target = format!("{}/{}", url.trim_end_matches('/'), notification.resource);
            let build = &notification.payload.build;
            self.reporter.info(format!(
                "Sending payload to {target} for {} with status {:?}/{:?}",
                notification.resource, build.phase, build.status
            ));
            let result = self
                .client
                .post(&target)
                .json(&notification.payload)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match result {
                Ok(_) => self
                    .reporter
                    .debug(format!("Sent payload to {target} for {}", notification.resource)),
                Err(e) => self
                    .reporter
                    .error(format!("Webhook delivery to {target} failed: {e}")),
            }
        }
    }
}

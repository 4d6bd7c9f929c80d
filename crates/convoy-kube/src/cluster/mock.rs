//! In-memory cluster for testing
//!
//! Resources are kept as JSON documents keyed by kind and name. With
//! `auto_ready` the mock fills in the status a healthy controller would
//! report, so availability checks complete on the first poll.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use convoy_core::{ClusterConfig, LiveResource, ResourceKind, ResourceObject, int_at, selector};
use serde_json::{Value, json};

use super::{ClusterApi, ClusterConnector, ClusterEvent, DeployMethod, read_manifest_file};
use crate::error::{DeployError, Result};

/// Counts of operations performed, for test assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub lists: usize,
    pub gets: usize,
    pub creates: usize,
    pub applies: usize,
    pub recreates: usize,
    pub deletes: usize,
    pub events: usize,
}

impl OperationCounts {
    /// Creates, applies and recreates together
    pub fn deploys(&self) -> usize {
        self.creates + self.applies + self.recreates
    }
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<(ResourceKind, String), Value>,
    events: Vec<ClusterEvent>,
    operations: OperationCounts,
    deployed: Vec<(DeployMethod, ResourceKind, String)>,
    deleted: Vec<(ResourceKind, String)>,
}

/// In-memory [`ClusterApi`] implementation
#[derive(Debug, Clone)]
pub struct MockCluster {
    name: String,
    auto_ready: bool,
    state: Arc<Mutex<State>>,
}

impl MockCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_ready: false,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Report every deployed resource as ready
    pub fn auto_ready(mut self) -> Self {
        self.auto_ready = true;
        self
    }

    /// Store a resource as-is, replacing any previous one
    pub fn insert(&self, value: Value) {
        let resource = LiveResource::new(value);
        let Some(kind) = resource.kind() else {
            return;
        };
        let key = (kind, resource.name().to_string());
        self.lock().resources.insert(key, resource.into_value());
    }

    /// Replace the `status` of a stored resource
    pub fn set_status(&self, kind: ResourceKind, name: &str, status: Value) {
        if let Some(resource) = self.lock().resources.get_mut(&(kind, name.to_string())) {
            resource["status"] = status;
        }
    }

    pub fn push_event(&self, event: ClusterEvent) {
        self.lock().events.push(event);
    }

    pub fn resource(&self, kind: ResourceKind, name: &str) -> Option<Value> {
        self.lock().resources.get(&(kind, name.to_string())).cloned()
    }

    /// Names of stored resources of one kind, sorted
    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        self.lock()
            .resources
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.lock().operations.clone()
    }

    pub fn reset_counts(&self) {
        let mut state = self.lock();
        state.operations = OperationCounts::default();
        state.deployed.clear();
        state.deleted.clear();
    }

    /// Every create/apply/recreate in call order
    pub fn deployed(&self) -> Vec<(DeployMethod, ResourceKind, String)> {
        self.lock().deployed.clone()
    }

    /// Every successful delete in call order
    pub fn deleted(&self) -> Vec<(ResourceKind, String)> {
        self.lock().deleted.clone()
    }

    // A poisoned lock only means another test thread panicked
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self, method: DeployMethod, path: &Path) -> Result<String> {
        let mut value = read_manifest_file(path)?;
        let resource = LiveResource::new(value.clone());
        let kind = resource.kind().ok_or_else(|| {
            DeployError::InvalidConfig(format!("unsupported kind {}", resource.kind_str()))
        })?;
        let name = resource.name().to_string();
        let key = (kind, name.clone());

        let mut state = self.lock();
        let previous = state.resources.get(&key).cloned();
        // Apply creates missing resources, like server-side apply
        if method == DeployMethod::Create && previous.is_some() {
            return Err(DeployError::InvalidConfig(format!(
                "{kind} '{name}' already exists"
            )));
        }

        let (created, generation) = match (method, &previous) {
            (DeployMethod::Apply, Some(live)) => (
                live.pointer("/metadata/creationTimestamp").cloned(),
                int_at(live, "/metadata/generation").unwrap_or(0) + 1,
            ),
            _ => (None, 1),
        };
        let metadata = &mut value["metadata"];
        metadata["creationTimestamp"] = created.unwrap_or_else(|| timestamp(Utc::now()));
        metadata["generation"] = json!(generation);
        if let Some(live) = previous.as_ref().filter(|_| method == DeployMethod::Apply) {
            value["status"] = live.get("status").cloned().unwrap_or(Value::Null);
        }

        if self.auto_ready {
            if let Some(status) = ready_status(kind, &value, generation) {
                value["status"] = status;
            }
            if kind == ResourceKind::Deployment {
                let pod = pod_for(&value, &name);
                state
                    .resources
                    .insert((ResourceKind::Pod, format!("{name}-pod")), pod);
            }
        }

        state.resources.insert(key, value);
        state.deployed.push((method, kind, name.clone()));
        match method {
            DeployMethod::Create => state.operations.creates += 1,
            DeployMethod::Apply => state.operations.applies += 1,
            DeployMethod::Recreate => state.operations.recreates += 1,
        }
        Ok(format!("{} {kind}/{name}", method.as_str()))
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(
        &self,
        kinds: &[ResourceKind],
        selector: Option<&str>,
    ) -> Result<Vec<LiveResource>> {
        let mut state = self.lock();
        state.operations.lists += 1;
        Ok(state
            .resources
            .iter()
            .filter(|((kind, _), _)| kinds.contains(kind))
            .map(|(_, value)| LiveResource::new(value.clone()))
            .filter(|resource| selector::matches(Some(&resource.labels()), selector))
            .collect())
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<LiveResource>> {
        let mut state = self.lock();
        state.operations.gets += 1;
        Ok(state
            .resources
            .get(&(kind, name.to_string()))
            .cloned()
            .map(LiveResource::new))
    }

    async fn create(&self, path: &Path) -> Result<String> {
        self.store(DeployMethod::Create, path)
    }

    async fn apply(&self, path: &Path) -> Result<String> {
        self.store(DeployMethod::Apply, path)
    }

    async fn recreate(&self, path: &Path) -> Result<String> {
        self.store(DeployMethod::Recreate, path)
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.operations.deletes += 1;
        if state.resources.remove(&(kind, name.to_string())).is_some() {
            state.deleted.push((kind, name.to_string()));
        }
        Ok(())
    }

    async fn events(&self) -> Result<Vec<ClusterEvent>> {
        let mut state = self.lock();
        state.operations.events += 1;
        // Newest first, like the API server listing
        Ok(state.events.iter().rev().cloned().collect())
    }
}

/// Hands out [`MockCluster`]s by cluster name
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    clusters: BTreeMap<String, MockCluster>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(mut self, cluster: MockCluster) -> Self {
        self.clusters.insert(cluster.name.clone(), cluster);
        self
    }
}

#[async_trait]
impl ClusterConnector for MockConnector {
    async fn connect(&self, config: &ClusterConfig) -> Result<Arc<dyn ClusterApi>> {
        match self.clusters.get(&config.name) {
            Some(cluster) => Ok(Arc::new(cluster.clone())),
            None => Err(DeployError::InvalidConfig(format!(
                "unable to connect to cluster {}",
                config.name
            ))),
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn ready_status(kind: ResourceKind, value: &Value, generation: i64) -> Option<Value> {
    match kind {
        ResourceKind::Deployment => {
            let replicas = int_at(value, "/spec/replicas").unwrap_or(1);
            Some(json!({
                "observedGeneration": generation,
                "replicas": replicas,
                "availableReplicas": replicas,
                "updatedReplicas": replicas,
            }))
        }
        ResourceKind::DaemonSet => Some(json!({
            "desiredNumberScheduled": 1,
            "currentNumberScheduled": 1,
        })),
        kind if kind.is_job_like() => Some(json!({ "succeeded": 1 })),
        _ => None,
    }
}

fn pod_for(deployment: &Value, name: &str) -> Value {
    let labels = deployment
        .pointer("/spec/template/metadata/labels")
        .cloned()
        .unwrap_or_else(|| json!({}));
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": format!("{name}-pod"), "labels": labels },
        "status": { "phase": "Running" },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, value: &Value) -> std::path::PathBuf {
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
        path
    }

    fn deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "labels": { "name": "web" } },
            "spec": {
                "replicas": 2,
                "template": { "metadata": { "labels": { "name": "web" } } }
            }
        })
    }

    #[tokio::test]
    async fn test_mock_create_and_get() {
        let cluster = MockCluster::new("east");
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, &deployment());

        cluster.create(&path).await.unwrap();
        let live = cluster
            .get(ResourceKind::Deployment, "web")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.generation(), Some(1));
        assert!(live.creation_timestamp().is_some());

        let counts = cluster.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
    }

    #[tokio::test]
    async fn test_mock_create_duplicate_fails() {
        let cluster = MockCluster::new("east");
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, &deployment());

        cluster.create(&path).await.unwrap();
        assert!(cluster.create(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_apply_bumps_generation() {
        let cluster = MockCluster::new("east");
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, &deployment());

        cluster.create(&path).await.unwrap();
        cluster.apply(&path).await.unwrap();
        let live = cluster.resource(ResourceKind::Deployment, "web").unwrap();
        assert_eq!(live["metadata"]["generation"], 2);
        assert_eq!(
            cluster.deployed(),
            vec![
                (DeployMethod::Create, ResourceKind::Deployment, "web".to_string()),
                (DeployMethod::Apply, ResourceKind::Deployment, "web".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_mock_auto_ready() {
        let cluster = MockCluster::new("east").auto_ready();
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, &deployment());

        cluster.create(&path).await.unwrap();
        let live = cluster.resource(ResourceKind::Deployment, "web").unwrap();
        assert_eq!(live["status"]["availableReplicas"], 2);
        assert_eq!(cluster.names(ResourceKind::Pod), vec!["web-pod".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_list_with_selector() {
        let cluster = MockCluster::new("east");
        cluster.insert(json!({
            "kind": "Deployment",
            "metadata": { "name": "a", "labels": { "name": "web", "id": "1" } }
        }));
        cluster.insert(json!({
            "kind": "Deployment",
            "metadata": { "name": "b", "labels": { "name": "web", "id": "2" } }
        }));
        cluster.insert(json!({
            "kind": "Service",
            "metadata": { "name": "web", "labels": { "name": "web" } }
        }));

        let all = cluster
            .list(&[ResourceKind::Deployment], None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filtered = cluster
            .list(&[ResourceKind::Deployment], Some("name=web,id!=1"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name(), "b");
    }

    #[tokio::test]
    async fn test_mock_delete_missing_is_ok() {
        let cluster = MockCluster::new("east");
        cluster.delete(ResourceKind::Service, "ghost").await.unwrap();
        assert!(cluster.deleted().is_empty());
        assert_eq!(cluster.operation_counts().deletes, 1);
    }
}

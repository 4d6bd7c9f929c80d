//! kube-rs transport
//!
//! Resources are handled as `DynamicObject`s. Applies use Server-Side Apply
//! with the `convoy` field manager and take ownership of conflicting fields.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_core::{ClusterConfig, LiveResource, ResourceKind};
use k8s_openapi::api::core::v1::Event;
use kube::{
    Client, Config,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::GroupVersionKind,
    discovery::ApiResource,
};
use serde_json::Value;

use super::{ClusterApi, ClusterConnector, ClusterEvent, read_manifest_file};
use crate::error::{DeployError, Result};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "convoy";

/// How long a recreate waits for the old object to disappear
const RECREATE_TIMEOUT: Duration = Duration::from_secs(60);
const RECREATE_POLL: Duration = Duration::from_secs(1);

/// A cluster reached through its kubeconfig
pub struct KubeCluster {
    name: String,
    client: Client,
    namespace: String,
}

impl KubeCluster {
    /// Connect using a cluster config document
    pub async fn connect(config: &ClusterConfig) -> Result<Self> {
        let kubeconfig: Kubeconfig = serde_json::from_value(config.document.clone())?;
        let options = KubeConfigOptions::default();
        let kube_config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
        let namespace = kube_config.default_namespace.clone();
        let client = Client::try_from(kube_config)?;

        tracing::debug!(cluster = %config.name, namespace = %namespace, "connected");
        Ok(Self::with_client(config.name.clone(), client, namespace))
    }

    /// Create with an existing Kubernetes client
    pub fn with_client(name: impl Into<String>, client: Client, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self, kind: ResourceKind) -> Api<DynamicObject> {
        let resource = api_resource(kind);
        if kind == ResourceKind::Namespace {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
        }
    }

    fn read_object(&self, path: &Path) -> Result<(ResourceKind, String, DynamicObject)> {
        let value = read_manifest_file(path)?;
        let kind_str = value.get("kind").and_then(Value::as_str).unwrap_or_default();
        let kind: ResourceKind = kind_str
            .parse()
            .map_err(|_| DeployError::InvalidConfig(format!("unsupported kind '{kind_str}'")))?;
        let object: DynamicObject = serde_json::from_value(value)?;
        let name = object.metadata.name.clone().ok_or_else(|| {
            DeployError::InvalidConfig(format!("{} is missing metadata.name", path.display()))
        })?;
        Ok((kind, name, object))
    }

    async fn wait_gone(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let api = self.api(kind);
        let deadline = tokio::time::Instant::now() + RECREATE_TIMEOUT;
        while api.get_opt(name).await?.is_some() {
            if tokio::time::Instant::now() >= deadline {
                return Err(DeployError::timeout(
                    format!("{kind}:{name} to be deleted"),
                    RECREATE_TIMEOUT,
                ));
            }
            tokio::time::sleep(RECREATE_POLL).await;
        }
        Ok(())
    }
}

/// Connects to clusters through their kubeconfig documents
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, config: &ClusterConfig) -> Result<Arc<dyn ClusterApi>> {
        Ok(Arc::new(KubeCluster::connect(config).await?))
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(
        &self,
        kinds: &[ResourceKind],
        selector: Option<&str>,
    ) -> Result<Vec<LiveResource>> {
        let mut params = ListParams::default();
        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }

        let mut items = Vec::new();
        for kind in kinds {
            let list = self.api(*kind).list(&params).await?;
            for object in list.items {
                items.push(to_live(*kind, &object)?);
            }
        }
        Ok(items)
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<LiveResource>> {
        match self.api(kind).get_opt(name).await? {
            Some(object) => Ok(Some(to_live(kind, &object)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, path: &Path) -> Result<String> {
        let (kind, name, object) = self.read_object(path)?;
        self.api(kind)
            .create(&PostParams::default(), &object)
            .await?;
        Ok(format!("{kind}/{name} created"))
    }

    async fn apply(&self, path: &Path) -> Result<String> {
        let (kind, name, object) = self.read_object(path)?;
        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;
        self.api(kind)
            .patch(&name, &params, &Patch::Apply(&object))
            .await?;
        Ok(format!("{kind}/{name} configured"))
    }

    async fn recreate(&self, path: &Path) -> Result<String> {
        let (kind, name, object) = self.read_object(path)?;
        self.delete(kind, &name).await?;
        self.wait_gone(kind, &name).await?;
        self.api(kind)
            .create(&PostParams::default(), &object)
            .await?;
        Ok(format!("{kind}/{name} replaced"))
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };
        match self.api(kind).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(DeployError::Api(e)),
        }
    }

    async fn events(&self) -> Result<Vec<ClusterEvent>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut items = api.list(&ListParams::default()).await?.items;
        items.sort_by_key(|e| std::cmp::Reverse(event_time(e)));
        Ok(items.into_iter().map(to_cluster_event).collect())
    }
}

/// Group, version and plural for each supported kind
fn api_resource(kind: ResourceKind) -> ApiResource {
    let (group, version, plural) = match kind {
        ResourceKind::Deployment => ("apps", "v1", "deployments"),
        ResourceKind::DaemonSet => ("apps", "v1", "daemonsets"),
        ResourceKind::ReplicaSet => ("apps", "v1", "replicasets"),
        ResourceKind::Job => ("batch", "v1", "jobs"),
        ResourceKind::CronJob => ("batch", "v1", "cronjobs"),
        ResourceKind::ScheduledJob => ("batch", "v2alpha1", "scheduledjobs"),
        ResourceKind::Service => ("", "v1", "services"),
        ResourceKind::Secret => ("", "v1", "secrets"),
        ResourceKind::Pod => ("", "v1", "pods"),
        ResourceKind::PersistentVolumeClaim => ("", "v1", "persistentvolumeclaims"),
        ResourceKind::Namespace => ("", "v1", "namespaces"),
        ResourceKind::Ingress => ("networking.k8s.io", "v1", "ingresses"),
    };
    let gvk = GroupVersionKind::gvk(group, version, kind.as_str());
    ApiResource::from_gvk_with_plural(&gvk, plural)
}

// List items come back without their type meta
fn to_live(kind: ResourceKind, object: &DynamicObject) -> Result<LiveResource> {
    let mut value = serde_json::to_value(object)?;
    if let Value::Object(map) = &mut value {
        let resource = api_resource(kind);
        map.insert("apiVersion".to_string(), Value::String(resource.api_version));
        map.insert("kind".to_string(), Value::String(resource.kind));
    }
    Ok(LiveResource::new(value))
}

/// Most recent timestamp an event carries, newer events sort first
fn event_time(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

fn to_cluster_event(event: Event) -> ClusterEvent {
    let involved = event.involved_object;
    ClusterEvent {
        uid: event.metadata.uid.unwrap_or_default(),
        event_type: event.type_.unwrap_or_default(),
        reason: event.reason.unwrap_or_default(),
        message: event.message.unwrap_or_default(),
        object_kind: involved.kind.unwrap_or_default(),
        object_name: involved.name.unwrap_or_default(),
        object_uid: involved.uid.unwrap_or_default(),
        count: event.count.unwrap_or(1),
        first_timestamp: event.first_timestamp.map(|t| t.0),
        last_timestamp: event.last_timestamp.map(|t| t.0),
    }
}

//! Cross-strategy cleanup of leftover deployments and replica sets

use std::collections::BTreeMap;

use convoy_core::{LiveResource, Manifest, ResourceKind, ResourceObject, StrategyKind, annotation, label};
use futures::future::try_join_all;
use serde_json::Value;

use super::TrackedDeployment;
use crate::cluster::ClusterApi;
use crate::error::{DeployError, Result};
use crate::events::Reporter;

/// Delete deployments and replica sets left behind by another strategy
///
/// For every tracked deployment, siblings sharing its `name` label but a
/// different `strategy` label are removed, together with orphaned replica
/// sets whose selector no longer covers the deployment's selector.
pub async fn cleanup(
    cluster: &dyn ClusterApi,
    strategy: StrategyKind,
    deployments: &[TrackedDeployment],
    reporter: &Reporter,
) -> Result<()> {
    try_join_all(
        deployments
            .iter()
            .map(|tracked| cleanup_one(cluster, strategy, &tracked.manifest, reporter)),
    )
    .await?;
    Ok(())
}

async fn cleanup_one(
    cluster: &dyn ClusterApi,
    strategy: StrategyKind,
    manifest: &Manifest,
    reporter: &Reporter,
) -> Result<()> {
    let Some(live) = cluster.get(ResourceKind::Deployment, manifest.name()).await? else {
        reporter.warn(format!(
            "Cleanup skipped, deployment {} not found in the cluster",
            manifest.name()
        ));
        return Ok(());
    };
    let group = required_label(&live, label::NAME)?;
    let live_strategy = required_label(&live, label::STRATEGY)?;
    if live_strategy != strategy.as_str() {
        reporter.warn(format!(
            "Deployment {} carries strategy {live_strategy}, expected {strategy}",
            manifest.name()
        ));
    }
    let selector = format!(
        "{}={group},{}!={live_strategy}",
        label::NAME,
        label::STRATEGY
    );

    let stale = cluster
        .list(&[ResourceKind::Deployment], Some(&selector))
        .await?;
    let stale = verify_same_original_name(stale, manifest);
    reporter.info(format!(
        "Cleanup found {} deployments matching {} group {selector}",
        stale.len(),
        manifest.name()
    ));
    for deployment in &stale {
        cluster
            .delete(ResourceKind::Deployment, deployment.name())
            .await?;
        reporter.info(format!("Cleanup deleted deployment {}", deployment.name()));
    }

    let replica_sets = cluster
        .list(&[ResourceKind::ReplicaSet], Some(&selector))
        .await?;
    let mut doomed = verify_same_original_name(replica_sets, manifest);
    for orphan in orphaned_replica_sets(cluster, &group, manifest, &live).await? {
        if !doomed.iter().any(|rs| rs.name() == orphan.name()) {
            doomed.push(orphan);
        }
    }
    for replica_set in &doomed {
        match cluster
            .delete(ResourceKind::ReplicaSet, replica_set.name())
            .await
        {
            Ok(()) => reporter.info(format!("Cleanup deleted replicaset {}", replica_set.name())),
            Err(e) => reporter.warn(format!(
                "Cleanup unable to delete replicaset {}: {e}",
                replica_set.name()
            )),
        }
    }
    Ok(())
}

/// Replica sets of the group that no deployment owns and that would not be
/// adopted by the current deployment
async fn orphaned_replica_sets(
    cluster: &dyn ClusterApi,
    group: &str,
    manifest: &Manifest,
    live: &LiveResource,
) -> Result<Vec<LiveResource>> {
    let wanted = live.selector();
    let candidates = cluster
        .list(
            &[ResourceKind::ReplicaSet],
            Some(&format!("{}={group}", label::NAME)),
        )
        .await?;
    let orphans = candidates
        .into_iter()
        .filter(|rs| !has_owner(rs))
        .filter(|rs| !covers(&rs.selector(), &wanted))
        .collect();
    Ok(verify_same_original_name(orphans, manifest))
}

fn has_owner(resource: &LiveResource) -> bool {
    resource
        .value()
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|owners| !owners.is_empty())
}

fn covers(selector: &BTreeMap<String, String>, wanted: &BTreeMap<String, String>) -> bool {
    wanted.iter().all(|(k, v)| selector.get(k) == Some(v))
}

fn required_label(live: &LiveResource, key: &str) -> Result<String> {
    live.label(key)
        .map(str::to_string)
        .ok_or_else(|| DeployError::MissingLiveField {
            kind: live.kind_str().to_string(),
            name: live.name().to_string(),
            field: format!("{key} label"),
        })
}

/// Keep the items that share the manifest's original name, excluding the
/// manifest itself
///
/// Label selectors alone could match an unrelated group that happens to use
/// the same `name` label.
pub fn verify_same_original_name(items: Vec<LiveResource>, manifest: &Manifest) -> Vec<LiveResource> {
    let original = manifest.original_name();
    items
        .into_iter()
        .filter(|item| item.name() != manifest.name())
        .filter(|item| item.annotation(annotation::ORIGINAL_NAME) == Some(original))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;
    use serde_json::json;

    fn manifest(name: &str) -> Manifest {
        Manifest::from_value(json!({
            "kind": "Deployment",
            "metadata": {
                "name": name,
                "annotations": { (annotation::ORIGINAL_NAME): "web" }
            }
        }))
        .unwrap()
    }

    fn resource(kind: &str, name: &str, original: &str, labels: Value) -> Value {
        json!({
            "kind": kind,
            "metadata": {
                "name": name,
                "labels": labels,
                "annotations": { (annotation::ORIGINAL_NAME): original }
            }
        })
    }

    #[test]
    fn test_verify_same_original_name() {
        let items = vec![
            LiveResource::new(resource("Deployment", "web", "web", json!({}))),
            LiveResource::new(resource("Deployment", "web-old", "web", json!({}))),
            LiveResource::new(resource("Deployment", "webby", "webby", json!({}))),
            LiveResource::new(json!({ "kind": "Deployment", "metadata": { "name": "bare" } })),
        ];
        let verified = verify_same_original_name(items, &manifest("web"));
        let names: Vec<_> = verified.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["web-old"]);
    }

    #[tokio::test]
    async fn test_cleanup_removes_other_strategy() {
        let cluster = MockCluster::new("east");
        cluster.insert(json!({
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "labels": { "name": "web", "strategy": "rolling-update" },
                "annotations": { (annotation::ORIGINAL_NAME): "web" }
            },
            "spec": { "selector": { "matchLabels": { "name": "web", "strategy": "rolling-update" } } }
        }));
        cluster.insert(resource(
            "Deployment",
            "web-dep-1",
            "web",
            json!({ "name": "web", "strategy": "fast-rollback" }),
        ));
        cluster.insert(resource(
            "ReplicaSet",
            "web-dep-1-abc",
            "web",
            json!({ "name": "web", "strategy": "fast-rollback" }),
        ));
        // Same group label, different original name
        cluster.insert(resource(
            "Deployment",
            "impostor",
            "other",
            json!({ "name": "web", "strategy": "fast-rollback" }),
        ));

        let tracked = [TrackedDeployment {
            manifest: manifest("web"),
            deploying: true,
        }];
        cleanup(&cluster, StrategyKind::RollingUpdate, &tracked, &Reporter::silent())
            .await
            .unwrap();

        assert_eq!(
            cluster.names(ResourceKind::Deployment),
            vec!["impostor".to_string(), "web".to_string()]
        );
        assert!(cluster.names(ResourceKind::ReplicaSet).is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_orphaned_replica_sets() {
        let cluster = MockCluster::new("east");
        cluster.insert(json!({
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "labels": { "name": "web", "strategy": "rolling-update" }
            },
            "spec": { "selector": { "matchLabels": { "name": "web", "tier": "front" } } }
        }));
        let mut orphan = resource(
            "ReplicaSet",
            "web-orphan",
            "web",
            json!({ "name": "web", "strategy": "rolling-update" }),
        );
        orphan["spec"] = json!({ "selector": { "matchLabels": { "name": "web" } } });
        cluster.insert(orphan);

        let mut owned = resource(
            "ReplicaSet",
            "web-owned",
            "web",
            json!({ "name": "web", "strategy": "rolling-update" }),
        );
        owned["metadata"]["ownerReferences"] = json!([{ "kind": "Deployment", "name": "web" }]);
        cluster.insert(owned);

        let mut current = resource(
            "ReplicaSet",
            "web-current",
            "web",
            json!({ "name": "web", "strategy": "rolling-update" }),
        );
        current["spec"] = json!({ "selector": { "matchLabels": { "name": "web", "tier": "front" } } });
        cluster.insert(current);

        let tracked = [TrackedDeployment {
            manifest: manifest("web"),
            deploying: true,
        }];
        cleanup(&cluster, StrategyKind::RollingUpdate, &tracked, &Reporter::silent())
            .await
            .unwrap();

        assert_eq!(
            cluster.names(ResourceKind::ReplicaSet),
            vec!["web-current".to_string(), "web-owned".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cleanup_requires_labels() {
        let cluster = MockCluster::new("east");
        cluster.insert(json!({
            "kind": "Deployment",
            "metadata": { "name": "web", "labels": { "name": "web" } }
        }));
        let tracked = [TrackedDeployment {
            manifest: manifest("web"),
            deploying: true,
        }];
        let err = cleanup(&cluster, StrategyKind::RollingUpdate, &tracked, &Reporter::silent())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::MissingLiveField { .. }));
    }
}

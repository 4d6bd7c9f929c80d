//! Supported resource kinds

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Resource kinds convoy knows how to deploy, watch or clean up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Deployment,
    DaemonSet,
    Job,
    CronJob,
    ScheduledJob,
    Service,
    Secret,
    Ingress,
    PersistentVolumeClaim,
    ReplicaSet,
    Pod,
    Namespace,
}

impl ResourceKind {
    /// Kinds accepted in a manifest directory
    pub const DEPLOYABLE: &'static [ResourceKind] = &[
        ResourceKind::Deployment,
        ResourceKind::DaemonSet,
        ResourceKind::Job,
        ResourceKind::CronJob,
        ResourceKind::ScheduledJob,
        ResourceKind::Service,
        ResourceKind::Secret,
        ResourceKind::Ingress,
        ResourceKind::PersistentVolumeClaim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Job => "Job",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::ScheduledJob => "ScheduledJob",
            ResourceKind::Service => "Service",
            ResourceKind::Secret => "Secret",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::Pod => "Pod",
            ResourceKind::Namespace => "Namespace",
        }
    }

    pub fn is_deployable(&self) -> bool {
        Self::DEPLOYABLE.contains(self)
    }

    /// Job-like kinds are immutable once created and get a content-hash name
    pub fn is_job_like(&self) -> bool {
        matches!(
            self,
            ResourceKind::Job | ResourceKind::CronJob | ResourceKind::ScheduledJob
        )
    }

    /// Kinds that cannot be patched in place and are deleted then created
    pub fn requires_recreate(&self) -> bool {
        self.is_job_like() || matches!(self, ResourceKind::DaemonSet)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    /// Case-insensitive, also accepts the lowercase plural/short forms kubectl uses
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Ok(ResourceKind::Deployment),
            "daemonset" | "daemonsets" | "ds" => Ok(ResourceKind::DaemonSet),
            "job" | "jobs" => Ok(ResourceKind::Job),
            "cronjob" | "cronjobs" => Ok(ResourceKind::CronJob),
            "scheduledjob" | "scheduledjobs" => Ok(ResourceKind::ScheduledJob),
            "service" | "services" | "svc" => Ok(ResourceKind::Service),
            "secret" | "secrets" => Ok(ResourceKind::Secret),
            "ingress" | "ingresses" | "ing" => Ok(ResourceKind::Ingress),
            "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" => {
                Ok(ResourceKind::PersistentVolumeClaim)
            }
            "replicaset" | "replicasets" | "rs" => Ok(ResourceKind::ReplicaSet),
            "pod" | "pods" => Ok(ResourceKind::Pod),
            "namespace" | "namespaces" | "ns" => Ok(ResourceKind::Namespace),
            _ => Err(s.to_string()),
        }
    }
}

/// Deploy strategy selector, stored in the reserved `strategy` label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    RollingUpdate,
    FastRollback,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RollingUpdate => "rolling-update",
            StrategyKind::FastRollback => "fast-rollback",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rolling-update" => Ok(StrategyKind::RollingUpdate),
            "fast-rollback" => Ok(StrategyKind::FastRollback),
            other => Err(CoreError::InvalidStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("Deployment".parse(), Ok(ResourceKind::Deployment));
        assert_eq!("pvc".parse(), Ok(ResourceKind::PersistentVolumeClaim));
        assert_eq!("CRONJOB".parse(), Ok(ResourceKind::CronJob));
        assert!("StatefulSet".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in ResourceKind::DEPLOYABLE {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(*kind));
        }
    }

    #[test]
    fn test_recreate_kinds() {
        assert!(ResourceKind::DaemonSet.requires_recreate());
        assert!(ResourceKind::Job.requires_recreate());
        assert!(ResourceKind::ScheduledJob.requires_recreate());
        assert!(!ResourceKind::Deployment.requires_recreate());
        assert!(!ResourceKind::Service.requires_recreate());
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("fast-rollback".parse::<StrategyKind>().unwrap(), StrategyKind::FastRollback);
        assert_eq!(StrategyKind::default().as_str(), "rolling-update");
        assert!(matches!(
            "blue-green".parse::<StrategyKind>(),
            Err(CoreError::InvalidStrategy(name)) if name == "blue-green"
        ));
    }

    #[test]
    fn test_deployable() {
        assert!(ResourceKind::Ingress.is_deployable());
        assert!(!ResourceKind::ReplicaSet.is_deployable());
        assert!(!ResourceKind::Namespace.is_deployable());
    }
}

//! Convoy Kube - Kubernetes side of the multi-cluster deploy orchestrator
//!
//! This crate provides:
//! - **Cluster access**: `ClusterApi` over kube-rs, an in-memory mock and a dry-run wrapper
//! - **Availability**: per-kind readiness polling with event based health checks
//! - **Dependencies**: waiting on declared `Kind/name` dependencies before deploying
//! - **Strategies**: rolling update and fast rollback with backup retention
//! - **Orchestration**: per-cluster deploy and concurrent multi-cluster fan-out
//! - **Sinks**: file backups, HTTP audit log, build webhooks and commit lookup

pub mod availability;
pub mod cluster;
pub mod coordinator;
pub mod dependency;
pub mod error;
pub mod events;
pub mod health;
pub mod namespaces;
pub mod options;
pub mod orchestrator;
pub mod progress;
pub mod sinks;
pub mod strategy;
pub mod watch;

pub use availability::{AvailabilityWatcher, Readiness, readiness};
pub use cluster::{
    ClusterApi, ClusterConnector, ClusterEvent, DeployMethod, DryRunCluster, KubeCluster,
    KubeConnector, MockCluster, MockConnector, OperationCounts,
};
pub use coordinator::ClusterCoordinator;
pub use dependency::DependencyResolver;
pub use error::{DeployError, Result};
pub use events::{CLUSTER_KIND, DeployEvent, LogLevel, Phase, Reporter, Status, StatusEvent};
pub use health::{HealthConfig, HealthMonitor};
pub use namespaces::NamespaceBootstrap;
pub use options::{
    AuditOptions, AvailableOptions, BackupFormat, BackupOptions, DependencyOptions,
    DeployOptions, GithubOptions,
};
pub use orchestrator::{ManifestOrchestrator, Plan};
pub use progress::{ClusterCounters, ClusterProgress, ProgressSnapshot};
pub use strategy::{DeployStrategy, FastRollback, RollingUpdate};

//! Convoy Core - Manifest model for the multi-cluster deploy orchestrator
//!
//! This crate holds everything that does not talk to a cluster:
//! - `Manifest` / `LiveResource`: declared and live resource documents
//! - `Annotator`: machine-managed annotations, labels and selectors
//! - `selector`: label selector predicate
//! - `diff`: structural diff with name-keyed array normalisation
//! - `files`: manifest and cluster config loading

pub mod annotations;
pub mod annotator;
pub mod commit;
pub mod diff;
pub mod error;
pub mod files;
pub mod kinds;
pub mod manifest;
pub mod selector;

pub use annotations::{ResourceRef, annotation, label, parse_depends_on};
pub use annotator::{Annotator, UNSPECIFIED_DEPLOY_ID};
pub use commit::CommitInfo;
pub use diff::{Change, ChangeKind, Differences};
pub use error::{CoreError, Result};
pub use files::{ClusterConfig, ManifestFile, load_cluster_configs, load_manifests};
pub use kinds::{ResourceKind, StrategyKind};
pub use manifest::{LiveResource, Manifest, ResourceObject, int_at};

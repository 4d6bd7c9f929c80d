//! Error types for convoy-kube

use std::time::Duration;

use thiserror::Error;

use crate::cluster::ClusterEvent;

/// Result type for convoy-kube operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors that can occur while deploying to a cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeployError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Resource not found
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// A bounded wait exceeded its deadline
    #[error("Timeout waiting for {what} after {}", human_duration(.after))]
    Timeout { what: String, after: Duration },

    /// Deployment is explicitly paused
    #[error("{kind}:{name} is paused")]
    Paused { kind: String, name: String },

    /// Health check escalated a cluster event
    #[error("Health check failed for {name}: {} {}", .event.reason, .event.message)]
    HealthCheck {
        name: String,
        event: Box<ClusterEvent>,
    },

    /// Manifest or config validation failed
    #[error(transparent)]
    Validation(#[from] convoy_core::CoreError),

    /// Service selector does not select any pod
    #[error("Service selector {selector} does not match any pods, aborting deploy of service {name}")]
    NoMatchingPods { name: String, selector: String },

    /// A live resource was updated after this run started
    #[error("Aborting because {kind} {name} has been updated since this deploy has started")]
    UpdatedSinceStart { kind: String, name: String },

    /// A required field is missing on a live resource
    #[error("Missing required {field} on {kind} {name}")]
    MissingLiveField {
        kind: String,
        name: String,
        field: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP delivery error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Every error collected while deploying one cluster
    #[error("{cluster}: {}", join_errors(.errors))]
    Cluster {
        cluster: String,
        errors: Vec<DeployError>,
    },

    /// Every error collected across a run
    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<DeployError>),
}

impl From<serde_json::Error> for DeployError {
    fn from(e: serde_json::Error) -> Self {
        DeployError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for DeployError {
    fn from(e: serde_yaml::Error) -> Self {
        DeployError::Serialization(e.to_string())
    }
}

impl From<kube::config::KubeconfigError> for DeployError {
    fn from(e: kube::config::KubeconfigError) -> Self {
        DeployError::InvalidConfig(e.to_string())
    }
}

impl DeployError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        DeployError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Taxonomy name reported in status payloads
    pub fn reason(&self) -> &'static str {
        match self {
            DeployError::Timeout { .. } => "TimeoutError",
            DeployError::Paused { .. } => "PauseError",
            DeployError::HealthCheck { .. } => "EventError",
            _ => "other",
        }
    }

    /// Check if this is a not-found error, including a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        match self {
            DeployError::NotFound { .. } => true,
            DeployError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

fn human_duration(duration: &Duration) -> String {
    humantime_serde::re::humantime::format_duration(*duration).to_string()
}

fn join_errors(errors: &[DeployError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

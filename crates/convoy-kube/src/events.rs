//! Deploy event stream
//!
//! Components never own an emitter. They hold a cloneable [`Reporter`] that
//! logs through `tracing` and forwards a typed [`DeployEvent`] to whoever
//! holds the receiving end of the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::progress::ProgressSnapshot;

/// Lifecycle phase of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Started,
    Completed,
}

/// Outcome carried by a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    InProgress,
    Success,
    Failure,
}

/// Kind used for cluster-level status events
pub const CLUSTER_KIND: &str = "Cluster";

/// Status update for one resource (or a whole cluster) in one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub cluster: String,
    pub name: String,
    pub kind: String,
    pub phase: Phase,
    pub status: Status,
    pub manifest: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusEvent {
    pub fn is_cluster(&self) -> bool {
        self.kind == CLUSTER_KIND
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Everything a run reports to its observers
#[derive(Debug, Clone, PartialEq)]
pub enum DeployEvent {
    Log {
        level: LogLevel,
        cluster: Option<String>,
        message: String,
    },
    Status(StatusEvent),
    Progress(ProgressSnapshot),
}

/// Cloneable handle for logging and forwarding deploy events
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    cluster: Option<String>,
    tx: Option<mpsc::UnboundedSender<DeployEvent>>,
}

impl Reporter {
    pub fn new(tx: mpsc::UnboundedSender<DeployEvent>) -> Self {
        Self {
            cluster: None,
            tx: Some(tx),
        }
    }

    /// Reporter paired with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeployEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Reporter that only logs
    pub fn silent() -> Self {
        Self::default()
    }

    /// Same channel, scoped to one cluster
    pub fn for_cluster(&self, cluster: impl Into<String>) -> Self {
        Self {
            cluster: Some(cluster.into()),
            tx: self.tx.clone(),
        }
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into());
    }

    pub fn status(&self, event: StatusEvent) {
        tracing::debug!(
            cluster = %event.cluster,
            kind = %event.kind,
            name = %event.name,
            phase = ?event.phase,
            status = ?event.status,
            "status"
        );
        self.send(DeployEvent::Status(event));
    }

    pub fn progress(&self, snapshot: ProgressSnapshot) {
        tracing::debug!(percent = snapshot.percent, "progress");
        self.send(DeployEvent::Progress(snapshot));
    }

    /// Pass along an event that was already logged where it was created
    pub fn forward(&self, event: DeployEvent) {
        self.send(event);
    }

    fn log(&self, level: LogLevel, message: String) {
        let cluster = self.cluster.as_deref().unwrap_or("-");
        match level {
            LogLevel::Debug => tracing::debug!(cluster, "{message}"),
            LogLevel::Info => tracing::info!(cluster, "{message}"),
            LogLevel::Warn => tracing::warn!(cluster, "{message}"),
            LogLevel::Error => tracing::error!(cluster, "{message}"),
        }
        self.send(DeployEvent::Log {
            level,
            cluster: self.cluster.clone(),
            message,
        });
    }

    // A closed receiver means nobody is listening any more
    fn send(&self, event: DeployEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reporter_forwards_with_cluster() {
        let (reporter, mut rx) = Reporter::channel();
        reporter.for_cluster("east").info("hello");

        match rx.try_recv().unwrap() {
            DeployEvent::Log {
                level,
                cluster,
                message,
            } => {
                assert_eq!(level, LogLevel::Info);
                assert_eq!(cluster.as_deref(), Some("east"));
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (reporter, rx) = Reporter::channel();
        drop(rx);
        reporter.warn("nobody listening");
        Reporter::silent().error("also fine");
    }

    #[test]
    fn test_status_serialization() {
        let event = StatusEvent {
            cluster: "east".into(),
            name: "web".into(),
            kind: "Deployment".into(),
            phase: Phase::Completed,
            status: Status::Failure,
            manifest: json!({}),
            reason: Some("TimeoutError".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["phase"], "COMPLETED");
        assert_eq!(value["status"], "FAILURE");
        assert_eq!(value["reason"], "TimeoutError");
    }
}

//! Multi-cluster progress tracking

use serde::{Deserialize, Serialize};

/// Counters over cluster names, only ever added to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCounters {
    pub total: usize,
    pub completed: usize,
    pub found: Vec<String>,
    pub remaining: Vec<String>,
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

/// Point-in-time view sent to observers and webhooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub clusters: ClusterCounters,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterProgress {
    clusters: ClusterCounters,
}

impl ClusterProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cluster: &str) {
        self.clusters.total += 1;
        self.clusters.found.push(cluster.to_string());
        self.clusters.remaining.push(cluster.to_string());
    }

    pub fn success(&mut self, cluster: &str) -> ProgressSnapshot {
        self.complete(cluster);
        self.clusters.successful.push(cluster.to_string());
        self.snapshot()
    }

    pub fn fail(&mut self, cluster: &str) -> ProgressSnapshot {
        self.complete(cluster);
        self.clusters.failed.push(cluster.to_string());
        self.snapshot()
    }

    fn complete(&mut self, cluster: &str) {
        self.clusters.completed += 1;
        self.clusters.remaining.retain(|c| c != cluster);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let percent = if self.clusters.total == 0 {
            0.0
        } else {
            self.clusters.completed as f64 / self.clusters.total as f64
        };
        ProgressSnapshot {
            percent,
            clusters: self.clusters.clone(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.clusters.remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let mut progress = ClusterProgress::new();
        progress.add("east");
        progress.add("west");
        assert_eq!(progress.snapshot().percent, 0.0);

        let snapshot = progress.success("east");
        assert_eq!(snapshot.percent, 0.5);
        assert_eq!(snapshot.clusters.remaining, vec!["west".to_string()]);

        let snapshot = progress.fail("west");
        assert_eq!(snapshot.percent, 1.0);
        assert_eq!(snapshot.clusters.successful, vec!["east".to_string()]);
        assert_eq!(snapshot.clusters.failed, vec!["west".to_string()]);
        assert_eq!(snapshot.clusters.found.len(), 2);
        assert!(progress.is_done());
    }

    #[test]
    fn test_empty_progress() {
        let progress = ClusterProgress::new();
        assert_eq!(progress.snapshot().percent, 0.0);
        assert!(progress.is_done());
    }
}

//! Polling watchers
//!
//! Both watchers poll the cluster on a fixed interval. Their `next` methods
//! are cancel safe: dropping the future between polls loses nothing, so they
//! can sit in a `tokio::select!` next to timers.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use convoy_core::{LiveResource, ResourceKind};
use tokio::time::{Interval, MissedTickBehavior};

use crate::cluster::{ClusterApi, ClusterEvent};
use crate::error::Result;

fn poller(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Watches one resource and yields it whenever it changes
pub struct ResourceWatcher {
    cluster: Arc<dyn ClusterApi>,
    kind: ResourceKind,
    name: String,
    interval: Interval,
    last: Option<LiveResource>,
}

impl ResourceWatcher {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        kind: ResourceKind,
        name: impl Into<String>,
        period: Duration,
    ) -> Self {
        Self {
            cluster,
            kind,
            name: name.into(),
            interval: poller(period),
            last: None,
        }
    }

    /// Next observed state that differs from the previous one
    ///
    /// A missing resource is not a change. Poll errors are returned and the
    /// watcher keeps working on the next call.
    pub async fn changed(&mut self) -> Result<LiveResource> {
        loop {
            self.interval.tick().await;
            let Some(current) = self.cluster.get(self.kind, &self.name).await? else {
                continue;
            };
            if self.last.as_ref() != Some(&current) {
                self.last = Some(current.clone());
                return Ok(current);
            }
        }
    }
}

/// Streams cluster events, oldest first, each delivered once
pub struct EventWatcher {
    cluster: Arc<dyn ClusterApi>,
    interval: Interval,
    since: Option<DateTime<Utc>>,
    seen: HashSet<(String, i32)>,
    pending: VecDeque<ClusterEvent>,
}

impl EventWatcher {
    /// Only events first seen at or after `since` are delivered; `None` delivers all
    pub fn new(cluster: Arc<dyn ClusterApi>, period: Duration, since: Option<DateTime<Utc>>) -> Self {
        Self {
            cluster,
            interval: poller(period),
            since,
            seen: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub async fn next(&mut self) -> Result<ClusterEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            self.interval.tick().await;
            let events = self.cluster.events().await?;
            self.accept(events);
        }
    }

    // The cluster lists newest first
    fn accept(&mut self, events: Vec<ClusterEvent>) {
        for event in events.into_iter().rev() {
            if !self.seen.insert((event.uid.clone(), event.count)) {
                continue;
            }
            if let (Some(since), Some(first)) = (self.since, event.first_timestamp) {
                if first < since {
                    continue;
                }
            }
            self.pending.push_back(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;
    use convoy_core::ResourceObject;
    use serde_json::json;

    fn event(uid: &str, count: i32, first: Option<DateTime<Utc>>) -> ClusterEvent {
        ClusterEvent {
            uid: uid.into(),
            event_type: "Warning".into(),
            reason: "BackOff".into(),
            count,
            first_timestamp: first,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_watcher_yields_changes_only() {
        let cluster = MockCluster::new("east");
        cluster.insert(json!({ "kind": "Service", "metadata": { "name": "web" } }));
        let mut watcher = ResourceWatcher::new(
            Arc::new(cluster.clone()),
            ResourceKind::Service,
            "web",
            Duration::from_secs(3),
        );

        let first = watcher.changed().await.unwrap();
        assert_eq!(first.value()["metadata"]["name"], "web");

        cluster.set_status(ResourceKind::Service, "web", json!({ "loadBalancer": {} }));
        let second = watcher.changed().await.unwrap();
        assert_eq!(second.value()["status"], json!({ "loadBalancer": {} }));
        assert_eq!(cluster.operation_counts().gets, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_watcher_waits_for_creation() {
        let cluster = MockCluster::new("east");
        let mut watcher = ResourceWatcher::new(
            Arc::new(cluster.clone()),
            ResourceKind::Secret,
            "creds",
            Duration::from_secs(3),
        );

        let pending = tokio::time::timeout(Duration::from_secs(10), watcher.changed()).await;
        assert!(pending.is_err());

        cluster.insert(json!({ "kind": "Secret", "metadata": { "name": "creds" } }));
        let found = watcher.changed().await.unwrap();
        assert_eq!(found.value()["kind"], "Secret");
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_watcher_dedup_and_order() {
        let cluster = MockCluster::new("east");
        cluster.push_event(event("a", 1, None));
        cluster.push_event(event("b", 1, None));
        let mut watcher = EventWatcher::new(Arc::new(cluster.clone()), Duration::from_secs(3), None);

        assert_eq!(watcher.next().await.unwrap().uid, "a");
        assert_eq!(watcher.next().await.unwrap().uid, "b");

        // Same uid with a higher count is a new occurrence
        cluster.push_event(event("a", 2, None));
        let repeated = watcher.next().await.unwrap();
        assert_eq!((repeated.uid.as_str(), repeated.count), ("a", 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_watcher_since_filter() {
        let now = Utc::now();
        let cluster = MockCluster::new("east");
        cluster.push_event(event("old", 1, Some(now - chrono::Duration::minutes(5))));
        cluster.push_event(event("new", 1, Some(now + chrono::Duration::seconds(1))));
        let mut watcher =
            EventWatcher::new(Arc::new(cluster.clone()), Duration::from_secs(3), Some(now));

        assert_eq!(watcher.next().await.unwrap().uid, "new");
    }
}

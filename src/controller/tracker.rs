//! Non-ready bookkeeping
//!
//! Remembers when each workload was first seen non-ready. The tracker only
//! measures; deciding what to do about a long outage is the reconciler's job.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::scanner::{Workload, WorkloadKey};

#[derive(Debug, Default)]
pub struct NonReadyTracker {
    since: HashMap<WorkloadKey, DateTime<Utc>>,
}

impl NonReadyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation of the cluster
    ///
    /// Must be called exactly once per pass with the complete snapshot.
    /// Returns how long each currently non-ready workload has been non-ready.
    /// Workloads that are ready, scaled to zero or gone lose their record.
    pub fn observe<'a, I>(
        &mut self,
        workloads: I,
        now: DateTime<Utc>,
    ) -> HashMap<WorkloadKey, Duration>
    where
        I: IntoIterator<Item = &'a Workload>,
    {
        let mut seen = HashSet::new();
        let mut elapsed = HashMap::new();

        for workload in workloads.into_iter().filter(|w| w.is_eligible()) {
            let key = &workload.key;
            seen.insert(key.clone());

            if workload.is_ready() {
                if self.since.remove(key).is_some() {
                    debug!("{} is ready again", key);
                }
                continue;
            }

            let since = *self.since.entry(key.clone()).or_insert_with(|| {
                debug!(
                    ready = workload.ready_replicas,
                    desired = workload.replicas,
                    "{} became non-ready",
                    key
                );
                now
            });
            elapsed.insert(key.clone(), (now - since).to_std().unwrap_or_default());
        }

        self.since.retain(|key, _| {
            let keep = seen.contains(key);
            if !keep {
                debug!("{} is no longer tracked", key);
            }
            keep
        });

        elapsed
    }

    /// When the workload was first observed non-ready, if it still is
    pub fn non_ready_since(&self, key: &WorkloadKey) -> Option<DateTime<Utc>> {
        self.since.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.since.len()
    }

    pub fn is_empty(&self) -> bool {
        self.since.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::deployment;
    use chrono::Duration as ChronoDuration;

    fn workload(name: &str, replicas: i32, ready: i32) -> Workload {
        Workload::from_deployment(&deployment("prod", name, replicas, ready)).unwrap()
    }

    #[test]
    fn test_ready_workloads_have_no_record() {
        let mut tracker = NonReadyTracker::new();
        let elapsed = tracker.observe(&[workload("web", 3, 3)], Utc::now());
        assert!(elapsed.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_clock_runs_from_first_detection() {
        let mut tracker = NonReadyTracker::new();
        let start = Utc::now();
        let web = workload("web", 3, 1);

        let elapsed = tracker.observe([&web], start);
        assert_eq!(elapsed[&web.key], Duration::ZERO);
        assert_eq!(tracker.non_ready_since(&web.key), Some(start));

        let elapsed = tracker.observe([&web], start + ChronoDuration::minutes(4));
        assert_eq!(elapsed[&web.key], Duration::from_secs(240));
        assert_eq!(tracker.non_ready_since(&web.key), Some(start));
    }

    #[test]
    fn test_readiness_resets_the_clock() {
        let mut tracker = NonReadyTracker::new();
        let start = Utc::now();
        let sick = workload("web", 3, 1);
        let healthy = workload("web", 3, 3);

        tracker.observe([&sick], start);
        tracker.observe([&healthy], start + ChronoDuration::minutes(2));
        assert!(tracker.is_empty());

        let later = start + ChronoDuration::minutes(3);
        let elapsed = tracker.observe([&sick], later);
        assert_eq!(elapsed[&sick.key], Duration::ZERO);
        assert_eq!(tracker.non_ready_since(&sick.key), Some(later));
    }

    #[test]
    fn test_absent_workloads_are_forgotten() {
        let mut tracker = NonReadyTracker::new();
        let now = Utc::now();
        tracker.observe(&[workload("web", 3, 0), workload("api", 2, 0)], now);
        assert_eq!(tracker.len(), 2);

        tracker.observe(&[workload("api", 2, 0)], now);
        assert_eq!(tracker.len(), 1);
        assert!(tracker
            .non_ready_since(&workload("web", 3, 0).key)
            .is_none());
    }

    #[test]
    fn test_scaled_to_zero_is_not_non_ready() {
        let mut tracker = NonReadyTracker::new();
        let now = Utc::now();
        tracker.observe(&[workload("web", 3, 0)], now);

        let elapsed = tracker.observe(&[workload("web", 0, 0)], now);
        assert!(elapsed.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_clock_going_backwards_yields_zero() {
        let mut tracker = NonReadyTracker::new();
        let now = Utc::now();
        let web = workload("web", 2, 0);
        tracker.observe([&web], now);
        let elapsed = tracker.observe([&web], now - ChronoDuration::minutes(1));
        assert_eq!(elapsed[&web.key], Duration::ZERO);
    }
}

//! One tracking task per job, keyed by job id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

use crate::tracker::poller::{ProgressTracker, TrackerEvent};

struct Tracked {
    generation: u64,
    forward: JoinHandle<()>,
    watch: AbortHandle,
}

/// Starts and stops tracking tasks. `start` and `stop` are idempotent.
#[derive(Clone)]
pub struct TrackerRegistry {
    tracker: Arc<ProgressTracker>,
    tasks: Arc<DashMap<Uuid, Tracked>>,
    generation: Arc<AtomicU64>,
}

impl TrackerRegistry {
    pub fn new(tracker: Arc<ProgressTracker>) -> Self {
        Self {
            tracker,
            tasks: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Begin tracking `job_id`. Returns `None` if it is already tracked.
    pub fn start(&self, job_id: Uuid) -> Option<mpsc::Receiver<TrackerEvent>> {
        match self.tasks.entry(job_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let (mut inner, watch) = self.tracker.watch(job_id);
                let watch_abort = watch.abort_handle();
                let (tx, rx) = mpsc::channel(16);
                let tasks = self.tasks.clone();

                // Forward events, then drop our own entry when the watch ends.
                let forward = tokio::spawn(async move {
                    while let Some(event) = inner.recv().await {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    watch.abort();
                    tasks.remove_if(&job_id, |_, t| t.generation == generation);
                });

                slot.insert(Tracked {
                    generation,
                    forward,
                    watch: watch_abort,
                });
                tracing::debug!(job_id = %job_id, "Tracker started");
                Some(rx)
            }
        }
    }

    /// Stop tracking `job_id`. Returns whether a task was running.
    pub fn stop(&self, job_id: Uuid) -> bool {
        match self.tasks.remove(&job_id) {
            Some((_, tracked)) => {
                tracked.watch.abort();
                tracked.forward.abort();
                tracing::debug!(job_id = %job_id, "Tracker stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every task, e.g. on teardown.
    pub fn stop_all(&self) {
        let ids: Vec<Uuid> = self.tasks.iter().map(|r| *r.key()).collect();
        for id in ids {
            self.stop(id);
        }
    }

    pub fn is_tracking(&self, job_id: Uuid) -> bool {
        self.tasks.contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::TrackerConfig;
    use crate::jobs::JobStore;

    fn registry(store: Arc<JobStore>) -> TrackerRegistry {
        let config = TrackerConfig {
            poll_interval_ms: 5,
            settle_delay_ms: 1,
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        TrackerRegistry::new(Arc::new(ProgressTracker::new(store, &config)))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let store = Arc::new(JobStore::new(vec!["report".into()]));
        let job = store.create("https://example.com/".into(), None);
        let registry = registry(store);

        let first = registry.start(job.id);
        assert!(first.is_some());
        assert!(registry.start(job.id).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.stop(job.id));
        assert!(!registry.stop(job.id));
        assert!(!registry.is_tracking(job.id));
    }

    #[tokio::test]
    async fn test_entry_removed_when_job_ends() {
        let store = Arc::new(JobStore::new(vec!["report".into()]));
        let job = store.create("https://example.com/".into(), None);
        let registry = registry(store.clone());

        let mut events = registry.start(job.id).unwrap();
        store.fail(job.id, "boom").unwrap();

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(TrackerEvent::Failed(_))));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let store = Arc::new(JobStore::new(vec!["report".into()]));
        let registry = registry(store.clone());
        for _ in 0..3 {
            let job = store.create("https://example.com/".into(), None);
            registry.start(job.id);
        }
        assert_eq!(registry.len(), 3);
        registry.stop_all();
        assert!(registry.is_empty());
    }
}

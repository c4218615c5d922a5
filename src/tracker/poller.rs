//! Polling a job until it reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::jobs::{AnalysisProgress, JobStatus};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::tracker::{ProgressSource, SourceError, TrackerError};

/// Events emitted by [`ProgressTracker::watch`]. Every variant but
/// `Progress` ends the watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    Progress(AnalysisProgress),
    /// Emitted once, after the settle delay.
    Completed(AnalysisProgress),
    Failed(AnalysisProgress),
    NotFound(Uuid),
    Error(String),
}

impl TrackerEvent {
    pub fn is_final(&self) -> bool {
        !matches!(self, TrackerEvent::Progress(_))
    }
}

pub struct ProgressTracker {
    source: Arc<dyn ProgressSource>,
    policy: RetryPolicy,
    poll_interval: Duration,
    settle_delay: Duration,
    /// Terminal snapshots; later polls answer from here while a watch runs.
    finished: DashMap<Uuid, AnalysisProgress>,
}

impl ProgressTracker {
    pub fn new(source: Arc<dyn ProgressSource>, config: &TrackerConfig) -> Self {
        Self {
            source,
            policy: RetryPolicy::from_config(config),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            finished: DashMap::new(),
        }
    }

    /// Fetch the current progress of `job_id`.
    ///
    /// Not-found is returned at once; transient errors are retried per the
    /// retry policy. Once a terminal snapshot is seen it is returned on every
    /// later poll; a watch releases it when it ends.
    pub async fn poll(&self, job_id: Uuid) -> Result<AnalysisProgress, TrackerError> {
        if let Some(done) = self.finished.get(&job_id) {
            metrics::record_poll("cached");
            return Ok(done.clone());
        }

        let source = self.source.clone();
        let result = self
            .policy
            .run(
                || {
                    let source = source.clone();
                    async move { source.fetch_progress(job_id).await }
                },
                |e| matches!(e, SourceError::Transient(_)),
            )
            .await;

        match result {
            Ok(progress) => {
                metrics::record_poll("ok");
                if progress.is_terminal() {
                    let stored = self.finished.entry(job_id).or_insert(progress);
                    return Ok(stored.clone());
                }
                Ok(progress)
            }
            Err(SourceError::NotFound(id)) => {
                metrics::record_poll("not_found");
                Err(TrackerError::JobNotFound(id))
            }
            Err(SourceError::Transient(message)) => {
                metrics::record_poll("error");
                tracing::warn!(job_id = %job_id, error = %message, "Progress poll failed");
                Err(TrackerError::Unavailable {
                    attempts: self.policy.max_attempts,
                    message,
                })
            }
        }
    }

    /// Poll `job_id` every poll interval on a background task, emitting
    /// events until a terminal state. Dropping the receiver or aborting the
    /// handle stops polling; no poll starts after the receiver is gone.
    pub fn watch(self: &Arc<Self>, job_id: Uuid) -> (mpsc::Receiver<TrackerEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let tracker = self.clone();
        let handle = tokio::spawn(async move {
            let _forget = ForgetOnDrop {
                finished: &tracker.finished,
                job_id,
            };
            tracker.watch_loop(job_id, &tx).await;
            tracing::debug!(job_id = %job_id, "Tracking stopped");
        });
        (rx, handle)
    }

    /// Number of memoized terminal snapshots.
    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }

    async fn watch_loop(&self, job_id: Uuid, tx: &mpsc::Sender<TrackerEvent>) {
        tracing::debug!(job_id = %job_id, "Tracking job");
        let mut last: Option<AnalysisProgress> = None;

        loop {
            let polled = tokio::select! {
                _ = tx.closed() => return,
                polled = self.poll(job_id) => polled,
            };

            let event = match polled {
                Ok(progress) => match progress.status {
                    JobStatus::Completed => {
                        // Let the final snapshot render before handing off to the report.
                        if !pause(tx, self.settle_delay).await {
                            return;
                        }
                        TrackerEvent::Completed(progress)
                    }
                    JobStatus::Failed => TrackerEvent::Failed(progress),
                    _ if last.as_ref() == Some(&progress) => {
                        if !pause(tx, self.poll_interval).await {
                            return;
                        }
                        continue;
                    }
                    _ => {
                        last = Some(progress.clone());
                        TrackerEvent::Progress(progress)
                    }
                },
                Err(TrackerError::JobNotFound(id)) => TrackerEvent::NotFound(id),
                Err(e) => TrackerEvent::Error(e.to_string()),
            };

            let done = event.is_final();
            if tx.send(event).await.is_err() || done {
                return;
            }
            if !pause(tx, self.poll_interval).await {
                return;
            }
        }
    }
}

/// Sleep for `delay` unless the receiver goes away first. Returns false if it did.
async fn pause(tx: &mpsc::Sender<TrackerEvent>, delay: Duration) -> bool {
    tokio::select! {
        _ = tx.closed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Drops a job's memoized terminal snapshot when its watch ends, aborted or not.
struct ForgetOnDrop<'a> {
    finished: &'a DashMap<Uuid, AnalysisProgress>,
    job_id: Uuid,
}

impl Drop for ForgetOnDrop<'_> {
    fn drop(&mut self) {
        self.finished.remove(&self.job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::jobs::{JobStore, ModuleStatus};

    fn config() -> TrackerConfig {
        TrackerConfig {
            poll_interval_ms: 5,
            settle_delay_ms: 5,
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    fn store() -> Arc<JobStore> {
        Arc::new(JobStore::new(vec!["seo".into(), "report".into()]))
    }

    /// Fails the first `failures` calls, then reads the store.
    struct Flaky {
        store: Arc<JobStore>,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProgressSource for Flaky {
        async fn fetch_progress(&self, job_id: Uuid) -> Result<AnalysisProgress, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(SourceError::Transient("connection reset".into()));
            }
            self.store.fetch_progress(job_id).await
        }
    }

    #[tokio::test]
    async fn test_unknown_job_not_retried() {
        let store = store();
        let flaky = Arc::new(Flaky {
            store,
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let tracker = ProgressTracker::new(flaky.clone(), &config());
        let id = Uuid::new_v4();
        assert!(matches!(tracker.poll(id).await, Err(TrackerError::JobNotFound(x)) if x == id));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retried_then_surfaced() {
        let store = store();
        let job = store.create("https://example.com/".into(), None);

        let recovering = ProgressTracker::new(
            Arc::new(Flaky {
                store: store.clone(),
                failures: 2,
                calls: AtomicU32::new(0),
            }),
            &config(),
        );
        assert_eq!(recovering.poll(job.id).await.unwrap().completion_percentage, 0);

        let broken = ProgressTracker::new(
            Arc::new(Flaky {
                store,
                failures: 100,
                calls: AtomicU32::new(0),
            }),
            &config(),
        );
        assert!(matches!(
            broken.poll(job.id).await,
            Err(TrackerError::Unavailable { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_terminal_snapshot_is_stable() {
        let store = store();
        let job = store.create("https://example.com/".into(), None);
        let tracker = ProgressTracker::new(store.clone(), &config());

        store.fail(job.id, "executor crashed").unwrap();
        let first = tracker.poll(job.id).await.unwrap();
        let second = tracker.poll(job.id).await.unwrap();
        assert_eq!(first.status, JobStatus::Failed);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_watch_emits_increasing_progress_then_completed_once() {
        let store = store();
        let job = store.create("https://example.com/".into(), None);
        let tracker = Arc::new(ProgressTracker::new(store.clone(), &config()));
        let (mut events, handle) = tracker.watch(job.id);

        let driver = {
            let store = store.clone();
            tokio::spawn(async move {
                for module in ["seo", "report"] {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    store.set_module(job.id, module, ModuleStatus::Running).unwrap();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    store.set_module(job.id, module, ModuleStatus::Completed).unwrap();
                }
            })
        };

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        driver.await.unwrap();
        handle.await.unwrap();

        let percentages: Vec<u8> = seen
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::Progress(p) | TrackerEvent::Completed(p) => Some(p.completion_percentage),
                _ => None,
            })
            .collect();
        assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percentages.first(), Some(&0));

        let completed: Vec<_> = seen.iter().filter(|e| matches!(e, TrackerEvent::Completed(_))).collect();
        assert_eq!(completed.len(), 1);
        assert!(matches!(seen.last(), Some(TrackerEvent::Completed(p)) if p.completion_percentage == 100));
    }

    #[tokio::test]
    async fn test_no_poll_after_receiver_dropped() {
        let store = store();
        let job = store.create("https://example.com/".into(), None);
        let counting = Arc::new(Flaky {
            store,
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let tracker = Arc::new(ProgressTracker::new(
            counting.clone(),
            &TrackerConfig {
                poll_interval_ms: 40,
                ..config()
            },
        ));

        let (mut events, handle) = tracker.watch(job.id);
        assert!(matches!(events.recv().await, Some(TrackerEvent::Progress(_))));
        drop(events);

        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_memo_released_when_watch_ends() {
        let store = store();
        let job = store.create("https://example.com/".into(), None);
        store.fail(job.id, "executor crashed").unwrap();
        let tracker = Arc::new(ProgressTracker::new(store, &config()));

        let (mut events, handle) = tracker.watch(job.id);
        assert!(matches!(events.recv().await, Some(TrackerEvent::Failed(_))));
        handle.await.unwrap();
        assert_eq!(tracker.finished_len(), 0);
    }

    #[tokio::test]
    async fn test_watch_unknown_job() {
        let tracker = Arc::new(ProgressTracker::new(store(), &config()));
        let id = Uuid::new_v4();
        let (mut events, _) = tracker.watch(id);
        assert_eq!(events.recv().await, Some(TrackerEvent::NotFound(id)));
        assert_eq!(events.recv().await, None);
    }
}

//! In-memory job store.
//!
//! The store is the only writer of job state. Each update runs under the
//! job's map entry lock and enforces:
//! - a terminal job never changes again;
//! - a terminal module never changes again;
//! - `completion_percentage` never decreases.

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{ResourceKind, ResponseCache};
use crate::jobs::types::{AnalysisJob, AnalysisProgress, JobError, JobResult, JobStatus, ModuleStatus};
use crate::observability::metrics;
use crate::unix_now;

pub struct JobStore {
    jobs: DashMap<Uuid, AnalysisJob>,
    modules: Vec<String>,
    cache: Option<ResponseCache>,
}

impl JobStore {
    /// A store whose jobs run `modules` in order; the last one produces the report.
    pub fn new(modules: Vec<String>) -> Self {
        Self {
            jobs: DashMap::new(),
            modules,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Create a pending job for `target`.
    pub fn create(&self, target: String, invoice_id: Option<Uuid>) -> AnalysisJob {
        self.create_with_id(Uuid::new_v4(), target, invoice_id)
    }

    /// Create a pending job under an id reserved by the caller.
    pub fn create_with_id(&self, id: Uuid, target: String, invoice_id: Option<Uuid>) -> AnalysisJob {
        let job = AnalysisJob::new(id, target, self.modules.iter().cloned(), invoice_id, unix_now());
        self.jobs.insert(job.id, job.clone());
        tracing::info!(job_id = %job.id, target = %job.target, invoice_id = ?invoice_id, "Job created");
        metrics::record_job_transition("pending");
        job
    }

    pub fn get(&self, id: Uuid) -> JobResult<AnalysisJob> {
        self.jobs
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(JobError::NotFound(id))
    }

    pub fn progress(&self, id: Uuid) -> JobResult<AnalysisProgress> {
        self.jobs
            .get(&id)
            .map(|r| r.progress())
            .ok_or(JobError::NotFound(id))
    }

    /// The report of a completed job.
    pub fn report(&self, id: Uuid) -> JobResult<Value> {
        let job = self.jobs.get(&id).ok_or(JobError::NotFound(id))?;
        match job.status {
            JobStatus::Completed => Ok(job.report.clone().unwrap_or(Value::Null)),
            JobStatus::Failed => Err(JobError::Failed {
                id,
                reason: job.error.clone().unwrap_or_else(|| "analysis failed".to_string()),
            }),
            status => Err(JobError::NotReady { id, status }),
        }
    }

    /// Move module `name` of job `id` to `next`, updating the job status.
    pub fn set_module(&self, id: Uuid, name: &str, next: ModuleStatus) -> JobResult<AnalysisProgress> {
        let mut job = self.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(JobError::Terminal { id, status: job.status });
        }

        let current = job
            .modules
            .get(name)
            .ok_or_else(|| JobError::UnknownModule(name.to_string()))?;
        if !current.can_transition_to(next) {
            return Err(JobError::InvalidModuleTransition {
                module: name.to_string(),
                from: current,
                to: next,
            });
        }
        job.modules.set(name, next);
        tracing::debug!(job_id = %id, module = %name, status = %next, "Module updated");

        let previous = job.status;
        job.completion_percentage = job.completion_percentage.max(job.modules.completion_percentage());

        let report_status = job.modules.last().map(|(_, s)| s);
        if report_status == Some(ModuleStatus::Failed) {
            job.status = JobStatus::Failed;
            job.error = Some(format!("module '{}' failed", name));
            job.completed_at = Some(unix_now());
        } else if job.modules.all_terminal() && report_status == Some(ModuleStatus::Completed) {
            job.status = JobStatus::Completed;
            job.completion_percentage = 100;
            job.completed_at = Some(unix_now());
        } else if job.modules.all_terminal() {
            // Report module skipped: nothing to hand over.
            job.status = JobStatus::Failed;
            job.error = Some("report was not produced".to_string());
            job.completed_at = Some(unix_now());
        } else if previous == JobStatus::Pending && next == ModuleStatus::Running {
            job.status = JobStatus::Processing;
        }

        if job.status != previous {
            self.on_transition(&job);
        } else {
            self.invalidate(id);
        }
        Ok(job.progress())
    }

    /// Attach the report blob. Only allowed before the job is terminal.
    pub fn set_report(&self, id: Uuid, report: Value) -> JobResult<()> {
        let mut job = self.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(JobError::Terminal { id, status: job.status });
        }
        job.report = Some(report);
        Ok(())
    }

    /// Fail a job. A job already terminal keeps its state.
    pub fn fail(&self, id: Uuid, reason: &str) -> JobResult<AnalysisProgress> {
        let mut job = self.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status.is_terminal() {
            return Err(JobError::Terminal { id, status: job.status });
        }
        job.status = JobStatus::Failed;
        job.error = Some(reason.to_string());
        job.completed_at = Some(unix_now());
        self.on_transition(&job);
        Ok(job.progress())
    }

    /// Remove terminal jobs finished at least `retention_secs` before `now`.
    pub fn prune(&self, now: u64, retention_secs: u64) -> usize {
        let mut removed = Vec::new();
        self.jobs.retain(|id, job| {
            let stale = job.status.is_terminal()
                && job
                    .completed_at
                    .is_some_and(|at| now >= at.saturating_add(retention_secs));
            if stale {
                removed.push(*id);
            }
            !stale
        });
        for id in &removed {
            self.invalidate(*id);
        }
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Pruned finished jobs");
        }
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Job counts by status.
    pub fn counts(&self) -> [(JobStatus, usize); 4] {
        let mut counts = [
            (JobStatus::Pending, 0),
            (JobStatus::Processing, 0),
            (JobStatus::Completed, 0),
            (JobStatus::Failed, 0),
        ];
        for job in self.jobs.iter() {
            if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == job.status) {
                slot.1 += 1;
            }
        }
        counts
    }

    fn on_transition(&self, job: &AnalysisJob) {
        match job.status {
            JobStatus::Failed => {
                tracing::warn!(job_id = %job.id, error = ?job.error, "Job failed");
            }
            status => {
                tracing::info!(job_id = %job.id, status = %status, percentage = job.completion_percentage, "Job status changed");
            }
        }
        metrics::record_job_transition(job.status.as_str());
        self.invalidate(job.id);
    }

    fn invalidate(&self, id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate(ResourceKind::Progress, id);
            cache.invalidate(ResourceKind::Report, id);
        }
    }
}

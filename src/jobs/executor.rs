//! Job execution capability.
//!
//! The analysis itself is external. An executor drives a job's modules
//! through the [`JobStore`] and attaches the report before finishing the last
//! module. [`SimulatedExecutor`] walks the pipeline with a fixed step delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::jobs::store::JobStore;
use crate::jobs::types::{AnalysisJob, JobError, ModuleStatus};
use crate::unix_now;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("analysis aborted: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run every module of `job`, recording progress in `store`.
    async fn execute(&self, job: &AnalysisJob, store: &JobStore) -> Result<(), ExecutorError>;
}

/// Executor that marks each module complete after a fixed delay.
pub struct SimulatedExecutor {
    step_delay: Duration,
    outcomes: HashMap<String, ModuleStatus>,
    abort_after: Option<String>,
}

impl SimulatedExecutor {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            outcomes: HashMap::new(),
            abort_after: None,
        }
    }

    /// Force the final status of one module.
    pub fn with_outcome(mut self, module: &str, status: ModuleStatus) -> Self {
        self.outcomes.insert(module.to_string(), status);
        self
    }

    /// Return an error once `module` finishes.
    pub fn abort_after(mut self, module: &str) -> Self {
        self.abort_after = Some(module.to_string());
        self
    }

    fn build_report(job: &AnalysisJob, store: &JobStore) -> Result<Value, JobError> {
        let current = store.get(job.id)?;
        let mut modules = Map::new();
        for (name, status) in current.modules.iter() {
            modules.insert(name.to_string(), json!(status));
        }
        Ok(json!({
            "job_id": job.id,
            "target": job.target,
            "generated_at": unix_now(),
            "modules": modules,
        }))
    }
}

#[async_trait]
impl JobExecutor for SimulatedExecutor {
    async fn execute(&self, job: &AnalysisJob, store: &JobStore) -> Result<(), ExecutorError> {
        let names: Vec<String> = job.modules.names().map(str::to_string).collect();
        let last = names.len().saturating_sub(1);

        for (i, name) in names.iter().enumerate() {
            let outcome = self.outcomes.get(name).copied().unwrap_or(ModuleStatus::Completed);
            if outcome == ModuleStatus::Skipped {
                store.set_module(job.id, name, ModuleStatus::Skipped)?;
                continue;
            }

            store.set_module(job.id, name, ModuleStatus::Running)?;
            tokio::time::sleep(self.step_delay).await;

            if i == last && outcome == ModuleStatus::Completed {
                store.set_report(job.id, Self::build_report(job, store)?)?;
            }
            store.set_module(job.id, name, outcome)?;

            if self.abort_after.as_deref() == Some(name.as_str()) {
                return Err(ExecutorError::Aborted(format!("stopped after '{}'", name)));
            }
        }
        Ok(())
    }
}

/// Dispatches admitted jobs to the executor on background tasks.
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<dyn JobExecutor>,
    store: Arc<JobStore>,
    shutdown: broadcast::Sender<()>,
}

impl JobRunner {
    pub fn new(executor: Arc<dyn JobExecutor>, store: Arc<JobStore>, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            executor,
            store,
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Run job `id` to completion. Executor errors and shutdown fail the job.
    pub fn dispatch(&self, id: Uuid) {
        let runner = self.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let job = match runner.store.get(id) {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Cannot dispatch job");
                    return;
                }
            };

            let outcome = tokio::select! {
                result = runner.executor.execute(&job, &runner.store) => result,
                _ = shutdown.recv() => Err(ExecutorError::Aborted("service shutting down".to_string())),
            };

            if let Err(e) = outcome {
                tracing::warn!(job_id = %id, error = %e, "Analysis did not finish");
                // Ignore Terminal: the job already reached its final state.
                let _ = runner.store.fail(id, &e.to_string());
            }
        });
    }
}

//! Job progress tracking.
//!
//! # Data Flow
//! ```text
//! TrackerRegistry::start(job_id)
//!     → ProgressTracker::watch → loop { poll → emit } every poll_interval
//!         poll → ProgressSource (JobStore in process, ApiClient over HTTP)
//!              → transient errors retried with backoff
//!     → terminal: Completed (after settle delay) | Failed | NotFound | Error
//! ```

pub mod poller;
pub mod registry;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::jobs::{AnalysisProgress, JobError, JobStore};

pub use poller::{ProgressTracker, TrackerEvent};
pub use registry::TrackerRegistry;

/// Error from a progress source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    /// Worth retrying: network or server trouble.
    #[error("{0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("progress unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },
}

/// Where progress snapshots come from.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn fetch_progress(&self, job_id: Uuid) -> Result<AnalysisProgress, SourceError>;
}

#[async_trait]
impl ProgressSource for JobStore {
    async fn fetch_progress(&self, job_id: Uuid) -> Result<AnalysisProgress, SourceError> {
        self.progress(job_id).map_err(|e| match e {
            JobError::NotFound(id) => SourceError::NotFound(id),
            other => SourceError::Transient(other.to_string()),
        })
    }
}

//! Analysis jobs.
//!
//! # Data Flow
//! ```text
//! Gateway admits → JobStore::create (pending) → JobRunner::dispatch
//!     → JobExecutor drives modules: pending → running → completed|failed|skipped
//!     → last module completes → job completed (100%)
//! ```

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{ExecutorError, JobExecutor, JobRunner, SimulatedExecutor};
pub use store::JobStore;
pub use types::{AnalysisJob, AnalysisProgress, JobError, JobResult, JobStatus, ModuleMap, ModuleStatus};

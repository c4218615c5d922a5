//! Resilience helpers for transient failures.
//!
//! ```text
//! poll → error → retryable? ──no──▶ surface now
//!                    │yes
//!                    ▼
//!         sleep(backoff(attempt)) → retry, until max_attempts → surface
//! ```

pub mod backoff;
pub mod retries;

pub use backoff::calculate_backoff;
pub use retries::RetryPolicy;

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (invoice_id, job_id, tx_hash)
//!     → metrics.rs counters, gauges, histograms
//!
//! Consumers:
//!     → logging.rs fmt subscriber (stdout)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;

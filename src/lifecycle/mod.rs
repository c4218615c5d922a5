//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Collaborators → Services → Background tasks → Listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → server drains, monitor and jobs stop → persist
//!
//! Retention (retention.rs):
//!     Every sweep interval: prune finished invoices and jobs, purge expired cache entries
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//! ```

pub mod retention;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use retention::RetentionSweep;
pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{build_state, connect_collaborators, persist, spawn_background, Collaborators, StartupError};

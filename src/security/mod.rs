//! Request admission controls.
//!
//! ```text
//! POST /analyze, POST /invoices
//!     → rate_limit.rs (token bucket per client IP)
//!     → handler
//! ```
//! Body size is capped for every route by the HTTP layer.

pub mod rate_limit;

pub use rate_limit::{rate_limit_middleware, RateLimiterState};

//! HTTP API.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request id, trace, timeout, body limit, metrics)
//!     → rate limit (write endpoints)
//!     → handlers.rs (decode, call gateway / invoices / jobs, read-through cache)
//!     → error.rs (domain error → status + {error, message})
//! ```

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{apply_config, AppState, HttpServer, X_REQUEST_ID};

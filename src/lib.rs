//! Payment-gated analysis service library.

pub mod admin;
pub mod blockchain;
pub mod cache;
pub mod client;
pub mod config;
pub mod flow;
pub mod gateway;
pub mod http;
pub mod invoices;
pub mod jobs;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod signer;
pub mod tracker;

use std::time::{SystemTime, UNIX_EPOCH};

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → invoice terms swapped atomically (new invoices only)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only payment terms are hot-swapped
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AppConfig, BlockchainConfig, CacheConfig, FlowConfig, GatewayConfig,
    InvoiceConfig, JobConfig, ListenerConfig, ObservabilityConfig, RateLimitConfig,
    RetentionConfig, SecurityConfig, TimeoutConfig, TrackerConfig,
};
pub use validation::ValidationError;

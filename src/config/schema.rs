//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the payment gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Blockchain integration settings.
    pub blockchain: BlockchainConfig,

    /// Invoice terms and settlement monitor.
    pub invoices: InvoiceConfig,

    /// Request gateway policy.
    pub gateway: GatewayConfig,

    /// Analysis job pipeline.
    pub jobs: JobConfig,

    /// Progress tracker polling policy.
    pub tracker: TrackerConfig,

    /// Client-side payment confirmation flow.
    pub flow: FlowConfig,

    /// Response cache.
    pub cache: CacheConfig,

    /// How long finished records are kept.
    pub retention: RetentionConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per second per IP.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 5,
            burst_size: 20,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/admin` routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    /// Overridden by `PAYGATE_ADMIN_KEY` when set.
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Blockchain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// Enable blockchain integration.
    pub enabled: bool,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// Chain ID (9745 for Plasma mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Number of block confirmations required for finality.
    pub confirmation_blocks: u32,

    /// Gas price multiplier (1.0 = estimated, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 9745,
            rpc_timeout_secs: 10,
            confirmation_blocks: 1,
            gas_price_multiplier: 1.2,
            max_gas_price_gwei: 500,
        }
    }
}

/// Fixed invoice terms plus settlement monitor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InvoiceConfig {
    /// Decimal amount charged per request (e.g., "0.10").
    pub amount: String,

    /// Token symbol shown to the payer.
    pub token: String,

    /// Network name shown to the payer.
    pub network: String,

    /// ERC-20 contract of the settlement token.
    pub token_address: String,

    /// Token decimals used to convert `amount` to base units.
    pub decimals: u8,

    /// Recipient of payments.
    pub merchant_address: String,

    /// Seconds a pending invoice stays payable.
    pub ttl_secs: u64,

    /// Settlement monitor polling interval in milliseconds.
    pub monitor_interval_ms: u64,

    /// How many recent blocks the monitor scans for unreported transfers.
    pub scan_block_window: u64,

    /// Snapshot file loaded at startup and written on shutdown.
    pub persistence_path: Option<String>,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            amount: "0.10".to_string(),
            token: "USDT0".to_string(),
            network: "plasma".to_string(),
            token_address: String::new(),
            decimals: 6,
            merchant_address: String::new(),
            ttl_secs: 15 * 60,
            monitor_interval_ms: 5_000,
            scan_block_window: 500,
            persistence_path: None,
        }
    }
}

/// Request gateway policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Require payment for targets not listed in `free_hosts`.
    pub payment_required: bool,

    /// Hosts admitted without payment (free tier).
    pub free_hosts: Vec<String>,

    /// Re-query the chain observer for the recorded tx hash before admitting.
    pub reverify_on_admit: bool,

    /// Maximum accepted length of a target URL.
    pub max_target_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            payment_required: true,
            free_hosts: Vec::new(),
            reverify_on_admit: true,
            max_target_len: 2048,
        }
    }
}

/// Analysis pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobConfig {
    /// Fixed, ordered module set. The last entry is the report assembly step.
    pub modules: Vec<String>,

    /// Simulated executor delay per module step in milliseconds.
    pub step_delay_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            modules: [
                "seo",
                "performance",
                "security",
                "accessibility",
                "social",
                "report",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            step_delay_ms: 1_500,
        }
    }
}

/// Progress tracker polling policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Fixed polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Delay between observing `completed` and emitting the terminal event.
    pub settle_delay_ms: u64,

    /// Attempts per poll for transient errors.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            settle_delay_ms: 800,
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
        }
    }
}

/// Client-side payment confirmation flow.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowConfig {
    /// How often the flow asks the invoice service for status.
    pub confirmation_poll_ms: u64,

    /// How long a submitted transaction may take before `timed_out`.
    pub confirmation_timeout_secs: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            confirmation_poll_ms: 2_000,
            confirmation_timeout_secs: 120,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to always read through to the stores.
    pub enabled: bool,

    /// Entry time-to-live in milliseconds.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 1_000,
        }
    }
}

/// Retention of finished invoices and jobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// How often the sweep runs, in milliseconds.
    pub sweep_interval_ms: u64,

    /// Seconds a consumed, expired or failed invoice is kept.
    pub invoice_secs: u64,

    /// Seconds a completed or failed job (and its report) is kept.
    pub job_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 60_000,
            invoice_secs: 24 * 60 * 60,
            job_secs: 60 * 60,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 64 * 1024,
        }
    }
}

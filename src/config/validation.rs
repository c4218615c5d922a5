//! Configuration validation.
//!
//! Serde handles syntax; this module checks meaning. All issues are
//! collected so an operator sees every problem in one pass.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use alloy::primitives::utils::parse_units;
use alloy::primitives::Address;

use crate::config::schema::AppConfig;

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            "must be a socket address",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    validate_invoices(config, &mut errors);
    validate_jobs(config, &mut errors);

    if config.gateway.payment_required && !config.blockchain.enabled {
        errors.push(ValidationError::new(
            "gateway.payment_required",
            "requires blockchain.enabled so invoices can settle",
        ));
    }
    if config.gateway.max_target_len == 0 {
        errors.push(ValidationError::new("gateway.max_target_len", "must be > 0"));
    }
    if config.tracker.poll_interval_ms == 0 {
        errors.push(ValidationError::new("tracker.poll_interval_ms", "must be > 0"));
    }
    if config.tracker.max_attempts == 0 {
        errors.push(ValidationError::new("tracker.max_attempts", "must be >= 1"));
    }
    if config.tracker.base_delay_ms > config.tracker.max_delay_ms {
        errors.push(ValidationError::new(
            "tracker.base_delay_ms",
            "must not exceed tracker.max_delay_ms",
        ));
    }
    if config.retention.sweep_interval_ms == 0 {
        errors.push(ValidationError::new("retention.sweep_interval_ms", "must be > 0"));
    }
    if config.rate_limit.enabled && config.rate_limit.requests_per_second == 0 {
        errors.push(ValidationError::new(
            "rate_limit.requests_per_second",
            "must be > 0 when rate limiting is enabled",
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_invoices(config: &AppConfig, errors: &mut Vec<ValidationError>) {
    let invoices = &config.invoices;

    match parse_units(&invoices.amount, invoices.decimals) {
        Ok(units) if invoices.amount.trim().starts_with('-') || units.get_absolute().is_zero() => {
            errors.push(ValidationError::new("invoices.amount", "must be > 0"));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new(
            "invoices.amount",
            format!("not a decimal amount with {} decimals: {}", invoices.decimals, e),
        )),
    }
    if invoices.token.trim().is_empty() {
        errors.push(ValidationError::new("invoices.token", "must not be empty"));
    }
    if invoices.network.trim().is_empty() {
        errors.push(ValidationError::new("invoices.network", "must not be empty"));
    }
    if invoices.ttl_secs == 0 {
        errors.push(ValidationError::new("invoices.ttl_secs", "must be > 0"));
    }
    if invoices.monitor_interval_ms == 0 {
        errors.push(ValidationError::new("invoices.monitor_interval_ms", "must be > 0"));
    }

    if config.gateway.payment_required {
        check_address(&invoices.merchant_address, "invoices.merchant_address", errors);
        check_address(&invoices.token_address, "invoices.token_address", errors);
    }
}

fn check_address(value: &str, field: &str, errors: &mut Vec<ValidationError>) {
    match value.parse::<Address>() {
        Ok(a) if a.is_zero() => {
            errors.push(ValidationError::new(field, "zero address not allowed"));
        }
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::new(field, "must be a 0x-prefixed address")),
    }
}

fn validate_jobs(config: &AppConfig, errors: &mut Vec<ValidationError>) {
    let modules = &config.jobs.modules;
    if modules.is_empty() {
        errors.push(ValidationError::new("jobs.modules", "must list at least one module"));
        return;
    }

    let mut seen = HashSet::new();
    for name in modules {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("jobs.modules", "module names must not be empty"));
        } else if !seen.insert(name.as_str()) {
            errors.push(ValidationError::new(
                "jobs.modules",
                format!("duplicate module '{}'", name),
            ));
        }
    }
}

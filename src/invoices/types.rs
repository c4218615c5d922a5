//! Invoice model and payment terms.

use std::fmt;

use alloy::primitives::utils::parse_units;
use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::blockchain::TransferQuery;
use crate::config::InvoiceConfig;

/// Lifecycle state of an invoice.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Confirmed,
    Expired,
    Failed,
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Confirmed => "confirmed",
            InvoiceStatus::Expired => "expired",
            InvoiceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by invoice operations.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("invoice {0} not found")]
    NotFound(Uuid),

    #[error("invoice {0} has expired")]
    Expired(Uuid),

    #[error("invoice {0} was already used for another analysis")]
    AlreadyConsumed(Uuid),

    /// Proof presented for an invoice that is not confirmed.
    #[error("invoice {id} is {status}, not confirmed")]
    NotConfirmed { id: Uuid, status: InvoiceStatus },

    /// Mutation attempted on an invoice that already left `pending`.
    #[error("invoice {id} is {status}, not pending")]
    NotPending { id: Uuid, status: InvoiceStatus },

    #[error("transaction {0} already settled another invoice")]
    TransactionAlreadyUsed(TxHash),

    #[error("invalid payer address: {0}")]
    InvalidPayer(String),

    #[error("invalid payment terms: {0}")]
    InvalidTerms(String),

    /// The invoice service could not be reached or answered unexpectedly.
    #[error("invoice service unavailable: {0}")]
    Unavailable(String),
}

/// Result type for invoice operations.
pub type InvoiceResult<T> = Result<T, InvoiceError>;

/// The fixed price of one analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTerms {
    /// Human-readable decimal amount, e.g. "0.10".
    pub amount: String,
    /// `amount` in token base units.
    pub amount_units: U256,
    pub token: String,
    pub network: String,
    pub token_address: Address,
    pub decimals: u8,
    pub merchant_address: Address,
    /// Seconds an invoice stays payable.
    pub ttl_secs: u64,
}

impl PaymentTerms {
    /// Build terms from configuration.
    ///
    /// Empty addresses are allowed (free deployments) and become the zero
    /// address; validation rejects them when payment is required.
    pub fn from_config(config: &InvoiceConfig) -> InvoiceResult<Self> {
        let amount_units = parse_units(&config.amount, config.decimals)
            .map_err(|e| InvoiceError::InvalidTerms(format!("amount '{}': {}", config.amount, e)))?
            .get_absolute();

        Ok(Self {
            amount: config.amount.clone(),
            amount_units,
            token: config.token.clone(),
            network: config.network.clone(),
            token_address: parse_optional_address(&config.token_address, "token_address")?,
            decimals: config.decimals,
            merchant_address: parse_optional_address(&config.merchant_address, "merchant_address")?,
            ttl_secs: config.ttl_secs,
        })
    }
}

fn parse_optional_address(value: &str, field: &str) -> InvoiceResult<Address> {
    if value.trim().is_empty() {
        return Ok(Address::ZERO);
    }
    value
        .parse()
        .map_err(|e| InvoiceError::InvalidTerms(format!("{} '{}': {}", field, value, e)))
}

/// A server-issued request for payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(rename = "invoice_id")]
    pub id: Uuid,
    pub amount: String,
    pub amount_units: U256,
    pub token: String,
    pub network: String,
    pub token_address: Address,
    pub decimals: u8,
    pub merchant_address: Address,
    pub payer_address: Address,
    pub status: InvoiceStatus,
    pub created_at: u64,
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<u64>,
    /// Settling transaction, recorded at confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    /// Hash the payer reported after broadcasting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_tx_hash: Option<TxHash>,
    /// Job admitted with this invoice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_by: Option<Uuid>,
}

impl Invoice {
    /// Mint a fresh pending invoice.
    pub fn new(terms: &PaymentTerms, payer: Address, now: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount: terms.amount.clone(),
            amount_units: terms.amount_units,
            token: terms.token.clone(),
            network: terms.network.clone(),
            token_address: terms.token_address,
            decimals: terms.decimals,
            merchant_address: terms.merchant_address,
            payer_address: payer,
            status: InvoiceStatus::Pending,
            created_at: now,
            expires_at: now.saturating_add(terms.ttl_secs),
            confirmed_at: None,
            tx_hash: None,
            reported_tx_hash: None,
            consumed_by: None,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_by.is_some()
    }

    /// Pending, unconsumed and not past its TTL at `now`.
    pub fn is_payable(&self, now: u64) -> bool {
        self.status == InvoiceStatus::Pending && !self.is_consumed() && now < self.expires_at
    }

    /// The transfer that settles this invoice.
    pub fn transfer_query(&self) -> TransferQuery {
        TransferQuery {
            tx_hash: self.tx_hash.or(self.reported_tx_hash),
            token: self.token_address,
            from: self.payer_address,
            to: self.merchant_address,
            min_amount: self.amount_units,
            not_before: self.created_at,
        }
    }

    /// Move a pending invoice past its TTL to `Expired`. Returns true if it moved.
    pub(crate) fn expire_if_due(&mut self, now: u64) -> bool {
        if self.status == InvoiceStatus::Pending && now >= self.expires_at {
            self.status = InvoiceStatus::Expired;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms() -> PaymentTerms {
        PaymentTerms::from_config(&InvoiceConfig {
            merchant_address: "0x00000000000000000000000000000000000000aa".into(),
            token_address: "0x00000000000000000000000000000000000000bb".into(),
            ..InvoiceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_terms_from_default_config() {
        let terms = terms();
        assert_eq!(terms.amount, "0.10");
        assert_eq!(terms.amount_units, U256::from(100_000u64));
        assert_eq!(terms.token, "USDT0");
        assert_eq!(terms.network, "plasma");
    }

    #[test]
    fn test_invalid_terms() {
        let config = InvoiceConfig {
            amount: "abc".into(),
            ..InvoiceConfig::default()
        };
        assert!(matches!(
            PaymentTerms::from_config(&config),
            Err(InvoiceError::InvalidTerms(_))
        ));
    }

    #[test]
    fn test_expire_only_when_due() {
        let mut invoice = Invoice::new(&terms(), Address::repeat_byte(1), 1_000);
        assert!(!invoice.expire_if_due(1_000 + 899));
        assert!(invoice.is_payable(1_000 + 899));
        assert!(invoice.expire_if_due(1_000 + 900));
        assert_eq!(invoice.status, InvoiceStatus::Expired);
        // Terminal: a second call does nothing.
        assert!(!invoice.expire_if_due(u64::MAX));
    }

    #[test]
    fn test_serialized_shape() {
        let invoice = Invoice::new(&terms(), Address::repeat_byte(1), 1_000);
        let value = serde_json::to_value(&invoice).unwrap();
        assert_eq!(value["invoice_id"], invoice.id.to_string());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["amount"], "0.10");
        assert!(value.get("tx_hash").is_none());
    }
}

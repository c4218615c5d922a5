//! Chain-specific types and error definitions.

use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export BlockchainConfig from config module to avoid duplication
pub use crate::config::schema::BlockchainConfig;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Invalid private key format or derivation error.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Gas price exceeded maximum allowed.
    #[error("Gas price {current_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceTooHigh { current_gwei: u64, max_gwei: u64 },

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// Blockchain client not initialized or disabled.
    #[error("Blockchain not available: {0}")]
    NotAvailable(String),
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

/// What the chain reports about a payment lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Nothing matching was found.
    NotFound,
    /// Transaction is known but not yet mined.
    Pending,
    /// Transaction has been mined but not enough confirmations.
    Confirming { current: u32, required: u32 },
    /// A matching transfer is confirmed with the required block depth.
    Confirmed { tx_hash: TxHash, block_number: u64 },
    /// The transaction was mined but does not pay what was asked.
    Mismatch(String),
    /// Transaction reverted on-chain.
    Failed(String),
}

impl ConfirmationStatus {
    /// True for a final, matching transfer.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConfirmationStatus::Confirmed { .. })
    }
}

/// Criteria describing the transfer that settles an invoice.
///
/// With `tx_hash` set the lookup checks that single transaction; without it
/// the observer searches recent token transfers for a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferQuery {
    pub tx_hash: Option<TxHash>,
    /// ERC-20 contract the transfer must be emitted by.
    pub token: Address,
    /// Paying wallet.
    pub from: Address,
    /// Merchant receiving the payment.
    pub to: Address,
    /// Lowest acceptable amount in token base units.
    pub min_amount: U256,
    /// Transfers mined before this unix time never match.
    pub not_before: u64,
}

impl TransferQuery {
    /// Same criteria, pinned to one transaction.
    pub fn with_hash(&self, tx_hash: TxHash) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_conversion() {
        let chain_id = ChainId::from(9745u64);
        assert_eq!(chain_id.0, 9745);
        assert_eq!(u64::from(chain_id), 9745);
    }

    #[test]
    fn test_default_config() {
        let config = BlockchainConfig::default();
        assert!(config.enabled);
        assert_eq!(config.rpc_timeout_secs, 10);
        assert_eq!(config.chain_id, 9745);
    }

    #[test]
    fn test_error_display() {
        let err = BlockchainError::GasPriceTooHigh {
            current_gwei: 600,
            max_gwei: 500,
        };
        assert!(err.to_string().contains("600"));
    }

    #[test]
    fn test_with_hash_keeps_criteria() {
        let query = TransferQuery {
            tx_hash: None,
            token: Address::repeat_byte(1),
            from: Address::repeat_byte(2),
            to: Address::repeat_byte(3),
            min_amount: U256::from(100_000u64),
            not_before: 1_700_000_000,
        };
        let pinned = query.with_hash(TxHash::repeat_byte(9));
        assert_eq!(pinned.tx_hash, Some(TxHash::repeat_byte(9)));
        assert_eq!(pinned.min_amount, query.min_amount);
        assert_eq!(pinned.not_before, query.not_before);
    }
}

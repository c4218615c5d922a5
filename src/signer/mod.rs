//! Wallet signing capability used by the payment flow.
//!
//! A [`WalletSigner`] exposes the payer's address and turns a
//! [`PaymentTransaction`] into a broadcast transaction hash. The user may
//! decline; that surfaces as [`SignerError::Rejected`].

pub mod local;
pub mod stub;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::invoices::Invoice;

pub use local::LocalKeySigner;
pub use stub::{StubOutcome, StubSigner};

/// Errors raised while connecting or signing.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The user declined to sign.
    #[error("signature rejected: {0}")]
    Rejected(String),

    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    /// Signed, but the network did not accept the transaction.
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// A token transfer settling one invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransaction {
    pub invoice_id: Uuid,
    pub token: Address,
    pub recipient: Address,
    pub amount: U256,
}

impl PaymentTransaction {
    pub fn for_invoice(invoice: &Invoice) -> Self {
        Self {
            invoice_id: invoice.id,
            token: invoice.token_address,
            recipient: invoice.merchant_address,
            amount: invoice.amount_units,
        }
    }
}

#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Connect and return the account that will pay.
    async fn connect(&self) -> Result<Address, SignerError>;

    /// Sign and broadcast `tx`, returning its hash.
    async fn sign_and_send(&self, tx: &PaymentTransaction) -> Result<TxHash, SignerError>;
}

//! Scripted signer for tests and offline demos.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use uuid::Uuid;

use crate::blockchain::{ConfirmationStatus, StaticObserver};
use crate::signer::{PaymentTransaction, SignerError, WalletSigner};

/// What the stub does on the next signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubOutcome {
    Approve,
    Reject,
    BroadcastFail,
    /// Approve, but the transaction reverts on chain.
    Revert,
}

/// A signer that answers from a queue of outcomes, approving once empty.
///
/// With an attached [`StaticObserver`], approved transactions become visible
/// to the invoice service as confirmed transfers.
pub struct StubSigner {
    address: Address,
    outcomes: Mutex<VecDeque<StubOutcome>>,
    observer: Option<Arc<StaticObserver>>,
    connect_fails: bool,
}

impl StubSigner {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            outcomes: Mutex::new(VecDeque::new()),
            observer: None,
            connect_fails: false,
        }
    }

    pub fn with_observer(mut self, observer: Arc<StaticObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Make `connect` fail, as when no wallet is installed.
    pub fn disconnected(mut self) -> Self {
        self.connect_fails = true;
        self
    }

    /// Queue the outcome of the next signing request.
    pub fn push_outcome(&self, outcome: StubOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    fn next_outcome(&self) -> StubOutcome {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(StubOutcome::Approve)
    }
}

#[async_trait]
impl WalletSigner for StubSigner {
    async fn connect(&self) -> Result<Address, SignerError> {
        if self.connect_fails {
            return Err(SignerError::Unavailable("no wallet detected".to_string()));
        }
        Ok(self.address)
    }

    async fn sign_and_send(&self, tx: &PaymentTransaction) -> Result<TxHash, SignerError> {
        let status = match self.next_outcome() {
            StubOutcome::Reject => return Err(SignerError::Rejected("user rejected the request".to_string())),
            StubOutcome::BroadcastFail => {
                return Err(SignerError::Broadcast("nonce too low".to_string()));
            }
            StubOutcome::Approve => None,
            StubOutcome::Revert => Some(ConfirmationStatus::Failed("Transaction reverted".to_string())),
        };

        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        let tx_hash = TxHash::from(bytes);
        if let Some(observer) = &self.observer {
            let status = status.unwrap_or(ConfirmationStatus::Confirmed {
                tx_hash,
                block_number: 1,
            });
            observer.set_transaction(tx_hash, status);
        }
        tracing::debug!(invoice_id = %tx.invoice_id, tx_hash = %tx_hash, "Stub signer sent transaction");
        Ok(tx_hash)
    }
}

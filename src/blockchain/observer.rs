//! Chain observation capability.
//!
//! The invoice service never talks to an RPC directly; it asks a
//! [`ChainObserver`] whether a transfer matching an invoice exists and how
//! final it is. [`RpcObserver`] answers from a live chain, [`StaticObserver`]
//! from scripted answers.

use std::sync::atomic::{AtomicBool, Ordering};

use alloy::primitives::{Address, TxHash, U256};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::blockchain::client::BlockchainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult, ConfirmationStatus, TransferQuery};
use crate::unix_now;

sol! {
    /// ERC-20 transfer event.
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Looks up payment transactions on a chain.
#[async_trait]
pub trait ChainObserver: Send + Sync {
    /// Report the confirmation state of the transfer described by `query`.
    async fn get_transaction(&self, query: &TransferQuery) -> BlockchainResult<ConfirmationStatus>;
}

/// Observer backed by the JSON-RPC client.
pub struct RpcObserver {
    client: BlockchainClient,
    /// Blocks searched backwards when no hash was reported.
    scan_block_window: u64,
}

impl RpcObserver {
    pub fn new(client: BlockchainClient, scan_block_window: u64) -> Self {
        Self {
            client,
            scan_block_window,
        }
    }

    async fn lookup_hash(&self, query: &TransferQuery, tx_hash: TxHash) -> BlockchainResult<ConfirmationStatus> {
        let receipt = match self.client.get_transaction_receipt(tx_hash).await? {
            Some(r) => r,
            None => {
                return Ok(match self.client.get_transaction_by_hash(tx_hash).await? {
                    Some(_) => ConfirmationStatus::Pending,
                    None => ConfirmationStatus::NotFound,
                });
            }
        };

        if receipt.from != query.from {
            return Ok(ConfirmationStatus::Mismatch(format!(
                "transaction sent by {}, expected {}",
                receipt.from, query.from
            )));
        }
        if !receipt.status() {
            return Ok(ConfirmationStatus::Failed("Transaction reverted".to_string()));
        }

        let pays = receipt
            .inner
            .logs()
            .iter()
            .any(|log| transfer_matches(log, query));
        if !pays {
            return Ok(ConfirmationStatus::Mismatch(
                "no matching token transfer in transaction".to_string(),
            ));
        }

        let current_block = self.client.get_block_number().await?;
        let tx_block = receipt.block_number.unwrap_or(current_block);
        if self.mined_before(tx_block, None, query.not_before).await? {
            return Ok(ConfirmationStatus::Mismatch("transaction predates the invoice".to_string()));
        }
        self.depth_status(tx_hash, tx_block, current_block)
    }

    /// Whether block `number` was mined before `not_before`. Uses the log's
    /// own timestamp when the node supplied one.
    async fn mined_before(&self, number: u64, stamped: Option<u64>, not_before: u64) -> BlockchainResult<bool> {
        let mined_at = match stamped {
            Some(t) => t,
            None => match self.client.get_block_timestamp(number).await? {
                Some(t) => t,
                None => return Err(BlockchainError::Rpc(format!("block {} not found", number))),
            },
        };
        Ok(mined_at < not_before)
    }

    async fn scan_transfers(&self, query: &TransferQuery) -> BlockchainResult<ConfirmationStatus> {
        let current_block = self.client.get_block_number().await?;
        let from_block = current_block.saturating_sub(self.scan_block_window);

        let filter = Filter::new()
            .address(query.token)
            .event_signature(Transfer::SIGNATURE_HASH)
            .topic1(query.from.into_word())
            .topic2(query.to.into_word())
            .from_block(from_block)
            .to_block(current_block);

        let logs = self.client.get_logs(&filter).await?;

        // Newest first, so a fresh payment wins over an older one. If even the
        // newest predates the invoice, nothing in the window pays it.
        let newest = logs
            .iter()
            .rev()
            .filter(|log| transfer_matches(log, query))
            .find_map(|log| Some((log.transaction_hash?, log.block_number?, log.block_timestamp)));

        let Some((tx_hash, block, stamped)) = newest else {
            return Ok(ConfirmationStatus::NotFound);
        };
        if self.mined_before(block, stamped, query.not_before).await? {
            return Ok(ConfirmationStatus::NotFound);
        }
        self.depth_status(tx_hash, block, current_block)
    }

    fn depth_status(&self, tx_hash: TxHash, tx_block: u64, current_block: u64) -> BlockchainResult<ConfirmationStatus> {
        let required = self.client.confirmation_blocks();
        // The inclusion block counts as the first confirmation.
        let confirmations = (current_block.saturating_sub(tx_block) + 1) as u32;

        if confirmations >= required {
            Ok(ConfirmationStatus::Confirmed {
                tx_hash,
                block_number: tx_block,
            })
        } else {
            tracing::debug!(
                tx_hash = %tx_hash,
                confirmations = confirmations,
                required = required,
                "Waiting for confirmations"
            );
            Ok(ConfirmationStatus::Confirming {
                current: confirmations,
                required,
            })
        }
    }
}

#[async_trait]
impl ChainObserver for RpcObserver {
    async fn get_transaction(&self, query: &TransferQuery) -> BlockchainResult<ConfirmationStatus> {
        match query.tx_hash {
            Some(tx_hash) => self.lookup_hash(query, tx_hash).await,
            None => self.scan_transfers(query).await,
        }
    }
}

fn transfer_matches(log: &Log, query: &TransferQuery) -> bool {
    if log.address() != query.token {
        return false;
    }
    match log.log_decode::<Transfer>() {
        Ok(decoded) => {
            let transfer = &decoded.inner.data;
            transfer.from == query.from && transfer.to == query.to && transfer.value >= query.min_amount
        }
        Err(_) => false,
    }
}

/// Observer answering from scripted results.
///
/// Used by tests and local demos where no chain is available. Each scripted
/// transfer carries the unix time it was mined; queries bound to a later
/// invoice see it as a mismatch.
#[derive(Default)]
pub struct StaticObserver {
    by_hash: DashMap<TxHash, (ConfirmationStatus, u64)>,
    by_payer: DashMap<Address, (ConfirmationStatus, u64)>,
    unavailable: AtomicBool,
}

impl StaticObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the answer for a specific transaction hash, mined now.
    pub fn set_transaction(&self, tx_hash: TxHash, status: ConfirmationStatus) {
        self.by_hash.insert(tx_hash, (status, unix_now()));
    }

    /// Script a confirmed transfer from `payer`, mined now, and return its hash.
    pub fn confirm_transfer_from(&self, payer: Address, amount: U256) -> TxHash {
        self.confirm_transfer_from_at(payer, amount, unix_now())
    }

    /// Script a confirmed transfer from `payer` mined at `mined_at`.
    ///
    /// The hash depends only on payer and amount, so scripting the same
    /// transfer twice yields the same hash.
    pub fn confirm_transfer_from_at(&self, payer: Address, amount: U256, mined_at: u64) -> TxHash {
        let mut seed = [0u8; 32];
        seed[..20].copy_from_slice(payer.as_slice());
        seed[24..].copy_from_slice(&amount.saturating_to::<u64>().to_be_bytes());
        let tx_hash = TxHash::from(seed);
        let status = ConfirmationStatus::Confirmed {
            tx_hash,
            block_number: 1,
        };
        self.by_hash.insert(tx_hash, (status.clone(), mined_at));
        self.by_payer.insert(payer, (status, mined_at));
        tx_hash
    }

    /// Make every lookup fail as if the RPC were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainObserver for StaticObserver {
    async fn get_transaction(&self, query: &TransferQuery) -> BlockchainResult<ConfirmationStatus> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BlockchainError::NotAvailable("static observer offline".to_string()));
        }
        let scripted = match query.tx_hash {
            Some(hash) => self.by_hash.get(&hash).map(|r| r.value().clone()),
            None => self.by_payer.get(&query.from).map(|r| r.value().clone()),
        };
        Ok(match scripted {
            Some((ConfirmationStatus::Confirmed { .. }, mined_at)) if mined_at < query.not_before => {
                match query.tx_hash {
                    Some(_) => ConfirmationStatus::Mismatch("transaction predates the invoice".to_string()),
                    None => ConfirmationStatus::NotFound,
                }
            }
            Some((status, _)) => status,
            None => ConfirmationStatus::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(from: Address) -> TransferQuery {
        TransferQuery {
            tx_hash: None,
            token: Address::repeat_byte(0xbb),
            from,
            to: Address::repeat_byte(0xaa),
            min_amount: U256::from(100_000u64),
            not_before: 0,
        }
    }

    #[tokio::test]
    async fn test_static_observer_defaults_to_not_found() {
        let observer = StaticObserver::new();
        let status = observer.get_transaction(&query(Address::ZERO)).await.unwrap();
        assert_eq!(status, ConfirmationStatus::NotFound);
    }

    #[tokio::test]
    async fn test_static_observer_scripted_transfer() {
        let observer = StaticObserver::new();
        let payer = Address::repeat_byte(0x11);
        let tx_hash = observer.confirm_transfer_from(payer, U256::from(100_000u64));

        let by_criteria = observer.get_transaction(&query(payer)).await.unwrap();
        assert!(by_criteria.is_confirmed());

        let by_hash = observer
            .get_transaction(&query(payer).with_hash(tx_hash))
            .await
            .unwrap();
        assert_eq!(
            by_hash,
            ConfirmationStatus::Confirmed {
                tx_hash,
                block_number: 1
            }
        );
    }

    #[tokio::test]
    async fn test_transfer_older_than_invoice_does_not_match() {
        let observer = StaticObserver::new();
        let payer = Address::repeat_byte(0x11);
        let tx_hash = observer.confirm_transfer_from_at(payer, U256::from(100_000u64), 1_000);

        let later = TransferQuery {
            not_before: 2_000,
            ..query(payer)
        };
        assert_eq!(
            observer.get_transaction(&later).await.unwrap(),
            ConfirmationStatus::NotFound
        );
        assert!(matches!(
            observer.get_transaction(&later.with_hash(tx_hash)).await.unwrap(),
            ConfirmationStatus::Mismatch(_)
        ));

        let earlier = TransferQuery {
            not_before: 1_000,
            ..query(payer)
        };
        assert!(observer.get_transaction(&earlier).await.unwrap().is_confirmed());
    }

    #[tokio::test]
    async fn test_static_observer_offline() {
        let observer = StaticObserver::new();
        observer.set_unavailable(true);
        assert!(observer.get_transaction(&query(Address::ZERO)).await.is_err());
    }
}

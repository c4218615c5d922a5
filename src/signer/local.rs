//! Signer backed by a local private key.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, TxHash};
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;

use crate::blockchain::transaction::TxBuilder;
use crate::blockchain::{BlockchainClient, BlockchainError, Wallet};
use crate::signer::{PaymentTransaction, SignerError, WalletSigner};

/// Signs with a key loaded from the environment and broadcasts over RPC.
pub struct LocalKeySigner {
    builder: TxBuilder,
    provider: Box<dyn Provider + Send + Sync>,
}

impl LocalKeySigner {
    pub fn new(client: BlockchainClient, wallet: Wallet) -> Result<Self, SignerError> {
        let rpc_url: url::Url = client
            .config()
            .rpc_url
            .parse()
            .map_err(|e| SignerError::Unavailable(format!("invalid RPC URL: {}", e)))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(wallet.signer().clone()))
            .connect_http(rpc_url);

        Ok(Self {
            builder: TxBuilder::new(client, wallet),
            provider: Box::new(provider),
        })
    }
}

#[async_trait]
impl WalletSigner for LocalKeySigner {
    async fn connect(&self) -> Result<Address, SignerError> {
        Ok(self.builder.address())
    }

    async fn sign_and_send(&self, tx: &PaymentTransaction) -> Result<TxHash, SignerError> {
        let request = self
            .builder
            .build_token_transfer(tx.token, tx.recipient, tx.amount)
            .await
            .map_err(|e| match e {
                BlockchainError::Wallet(msg) => SignerError::Unavailable(msg),
                other => SignerError::Broadcast(other.to_string()),
            })?;

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| SignerError::Broadcast(e.to_string()))?;

        let tx_hash = *pending.tx_hash();
        tracing::info!(
            invoice_id = %tx.invoice_id,
            tx_hash = %tx_hash,
            amount = %tx.amount,
            "Payment transaction broadcast"
        );
        Ok(tx_hash)
    }
}

//! Transaction building for token payments.
//!
//! # Responsibilities
//! - Encode ERC-20 `transfer` calls
//! - Fill nonce, gas price (with ceiling) and gas limit
//! - Keep the wallet nonce in sync with the chain

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::blockchain::client::BlockchainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult};
use crate::blockchain::wallet::Wallet;

sol! {
    /// ERC-20 transfer.
    function transfer(address to, uint256 amount) external returns (bool);
}

/// Gas limit used when estimation fails.
const FALLBACK_TRANSFER_GAS: u64 = 100_000;

/// Transaction builder for token transfers.
pub struct TxBuilder {
    client: BlockchainClient,
    wallet: Wallet,
}

impl TxBuilder {
    /// Create a new transaction builder.
    pub fn new(client: BlockchainClient, wallet: Wallet) -> Self {
        Self { client, wallet }
    }

    /// ABI-encode an ERC-20 `transfer(to, amount)` call.
    pub fn transfer_calldata(to: Address, amount: U256) -> Bytes {
        transferCall { to, amount }.abi_encode().into()
    }

    /// Build a signed-ready request paying `amount` of `token` to `recipient`.
    pub async fn build_token_transfer(
        &self,
        token: Address,
        recipient: Address,
        amount: U256,
    ) -> BlockchainResult<TransactionRequest> {
        let chain_nonce = self.client.get_transaction_count(self.wallet.address()).await?;
        self.wallet.set_nonce(chain_nonce);

        let gas_price = self.client.get_gas_price().await?;
        let gas_price_gwei = gas_price / 1_000_000_000;

        let config = self.client.config();
        if gas_price_gwei > config.max_gas_price_gwei as u128 {
            return Err(BlockchainError::GasPriceTooHigh {
                current_gwei: gas_price_gwei as u64,
                max_gwei: config.max_gas_price_gwei,
            });
        }

        let adjusted_gas_price = (gas_price as f64 * config.gas_price_multiplier) as u128;

        let request = TransactionRequest::default()
            .with_from(self.wallet.address())
            .with_to(token)
            .with_input(Self::transfer_calldata(recipient, amount))
            .with_chain_id(self.wallet.chain_id());

        let gas_limit = match self.client.estimate_gas(&request).await {
            Ok(estimate) => estimate + estimate / 5,
            Err(e) => {
                tracing::warn!(error = %e, "Gas estimation failed, using fallback limit");
                FALLBACK_TRANSFER_GAS
            }
        };

        let nonce = self.wallet.get_and_increment_nonce();

        Ok(request
            .with_nonce(nonce)
            .with_gas_price(adjusted_gas_price)
            .with_gas_limit(gas_limit))
    }

    /// Get the wallet address.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Invoice settlement:
//!     observer.rs (ChainObserver) → client.rs (RPC with failover)
//!
//! Paying an invoice (client side):
//!     wallet.rs (key from env) → transaction.rs (ERC-20 transfer) → signer::LocalKeySigner
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod client;
pub mod observer;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::BlockchainClient;
pub use observer::{ChainObserver, RpcObserver, StaticObserver};
pub use types::{BlockchainConfig, BlockchainError, BlockchainResult, ChainId, ConfirmationStatus, TransferQuery};
pub use wallet::Wallet;

//! The invoice capability as seen by a payer.
//!
//! The payment flow drives this trait; the in-process service and the HTTP
//! client both implement it.

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use uuid::Uuid;

use crate::invoices::types::{Invoice, InvoiceResult, InvoiceStatus};

#[async_trait]
pub trait InvoiceApi: Send + Sync {
    /// Obtain an invoice payable by `payer`.
    async fn request_invoice(&self, payer: Address) -> InvoiceResult<Invoice>;

    /// Current status of invoice `id`.
    async fn fetch_status(&self, id: Uuid) -> InvoiceResult<InvoiceStatus>;

    /// Tell the issuer which transaction pays invoice `id`.
    async fn submit_transaction(&self, id: Uuid, tx_hash: TxHash) -> InvoiceResult<()>;
}

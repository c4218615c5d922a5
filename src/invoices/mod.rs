//! Invoice lifecycle.
//!
//! # Data Flow
//! ```text
//! create_invoice(payer) → pending ──(transfer observed)──▶ confirmed ──consume──▶ used
//!                            │
//!                            ├──(TTL elapsed)──▶ expired
//!                            └──(reported tx reverted)──▶ failed
//! ```
//!
//! Confirmation comes only from the service's own [`ChainObserver`]; a
//! client-reported hash is a hint that narrows the lookup.
//!
//! [`ChainObserver`]: crate::blockchain::ChainObserver

pub mod api;
pub mod monitor;
pub mod service;
pub mod types;

pub use api::InvoiceApi;
pub use monitor::SettlementMonitor;
pub use service::{InvoiceService, InvoiceSummary};
pub use types::{Invoice, InvoiceError, InvoiceResult, InvoiceStatus, PaymentTerms};

//! Payment confirmation flow.
//!
//! Drives one payer session from wallet connection to a confirmed invoice:
//!
//! ```text
//! disconnected ──connect──▶ wallet_connected ──request_invoice──▶ invoice_pending
//!      invoice_pending ──pay──▶ awaiting_signature ──signed──▶ submitted
//!      awaiting_signature ──rejected──▶ invoice_pending
//!      submitted ──confirmed──▶ confirmed
//!      submitted ──timeout──▶ timed_out ──retry──▶ invoice_pending
//!      any waiting state ──invoice expired/failed──▶ wallet_connected
//! ```
//!
//! Rejection and timeout keep the invoice. Only the invoice service's TTL
//! expires it.

pub mod state;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::FlowConfig;
use crate::invoices::{Invoice, InvoiceApi, InvoiceError, InvoiceStatus};
use crate::signer::{PaymentTransaction, SignerError, WalletSigner};

pub use state::FlowState;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("signature rejected: {0}")]
    SignatureRejected(String),

    #[error("invoice {invoice_id} not confirmed within {waited:?}")]
    TransactionTimeout { invoice_id: Uuid, waited: Duration },

    #[error("invoice {0} expired before payment confirmed")]
    InvoiceExpired(Uuid),

    #[error("payment for invoice {0} failed on chain")]
    InvoiceFailed(Uuid),

    #[error("cannot {action} while {from}")]
    InvalidTransition { from: FlowState, action: &'static str },

    #[error("wallet unavailable: {0}")]
    Wallet(String),

    #[error("transaction not broadcast: {0}")]
    Broadcast(String),

    #[error(transparent)]
    Invoice(#[from] InvoiceError),

    #[error("confirmation wait cancelled")]
    Cancelled,
}

/// Interrupts a confirmation wait from another task.
#[derive(Clone)]
pub struct FlowCanceller {
    tx: Arc<watch::Sender<u64>>,
}

impl FlowCanceller {
    pub fn cancel(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }
}

/// One payer's payment session.
pub struct PaymentFlow {
    invoices: Arc<dyn InvoiceApi>,
    signer: Arc<dyn WalletSigner>,
    poll_interval: Duration,
    timeout: Duration,
    state: FlowState,
    payer: Option<Address>,
    invoice: Option<Invoice>,
    tx_hash: Option<TxHash>,
    cancel: Arc<watch::Sender<u64>>,
    /// Cancel generation seen when the current payment attempt began.
    armed: u64,
}

impl PaymentFlow {
    pub fn new(
        invoices: Arc<dyn InvoiceApi>,
        signer: Arc<dyn WalletSigner>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        let (cancel, _) = watch::channel(0);
        Self {
            invoices,
            signer,
            poll_interval,
            timeout,
            state: FlowState::Disconnected,
            payer: None,
            invoice: None,
            tx_hash: None,
            cancel: Arc::new(cancel),
            armed: 0,
        }
    }

    pub fn from_config(invoices: Arc<dyn InvoiceApi>, signer: Arc<dyn WalletSigner>, config: &FlowConfig) -> Self {
        Self::new(
            invoices,
            signer,
            Duration::from_millis(config.confirmation_poll_ms),
            Duration::from_secs(config.confirmation_timeout_secs),
        )
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn payer(&self) -> Option<Address> {
        self.payer
    }

    pub fn invoice(&self) -> Option<&Invoice> {
        self.invoice.as_ref()
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        self.tx_hash
    }

    pub fn canceller(&self) -> FlowCanceller {
        FlowCanceller {
            tx: self.cancel.clone(),
        }
    }

    fn transition(&mut self, next: FlowState) {
        tracing::debug!(from = %self.state, to = %next, invoice_id = ?self.invoice.as_ref().map(|i| i.id), "Payment flow transition");
        self.state = next;
    }

    fn expect(&self, allowed: &[FlowState], action: &'static str) -> Result<(), FlowError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(FlowError::InvalidTransition {
                from: self.state,
                action,
            })
        }
    }

    /// The invoice is gone for good; a new one is needed.
    fn drop_invoice(&mut self) {
        self.invoice = None;
        self.tx_hash = None;
        self.transition(FlowState::WalletConnected);
    }

    fn current_invoice_id(&self) -> Result<Uuid, FlowError> {
        self.invoice.as_ref().map(|i| i.id).ok_or(FlowError::InvalidTransition {
            from: self.state,
            action: "continue without an invoice",
        })
    }

    /// Connect the wallet and learn the payer address.
    pub async fn connect(&mut self) -> Result<Address, FlowError> {
        self.expect(&[FlowState::Disconnected], "connect")?;
        let payer = self.signer.connect().await.map_err(|e| FlowError::Wallet(e.to_string()))?;
        self.payer = Some(payer);
        self.transition(FlowState::WalletConnected);
        tracing::info!(payer = %payer, "Wallet connected");
        Ok(payer)
    }

    /// Obtain an invoice for the connected payer.
    pub async fn request_invoice(&mut self) -> Result<Invoice, FlowError> {
        self.expect(&[FlowState::WalletConnected], "request an invoice")?;
        let payer = self.payer.ok_or(FlowError::InvalidTransition {
            from: self.state,
            action: "request an invoice without a payer",
        })?;

        let invoice = self.invoices.request_invoice(payer).await?;
        tracing::info!(invoice_id = %invoice.id, amount = %invoice.amount, token = %invoice.token, "Invoice received");
        self.invoice = Some(invoice.clone());
        self.transition(FlowState::InvoicePending);
        Ok(invoice)
    }

    /// Ask the wallet to sign and broadcast the payment.
    pub async fn pay(&mut self) -> Result<(), FlowError> {
        self.expect(&[FlowState::InvoicePending], "pay")?;
        let invoice_id = self.current_invoice_id()?;
        // A cancel from here on is meant for this attempt's wait.
        self.armed = *self.cancel.borrow();

        match self.invoices.fetch_status(invoice_id).await? {
            InvoiceStatus::Pending => {}
            InvoiceStatus::Confirmed => {
                // Settled by an earlier transaction; nothing to sign.
                self.transition(FlowState::Confirmed);
                return Ok(());
            }
            InvoiceStatus::Expired => {
                self.drop_invoice();
                return Err(FlowError::InvoiceExpired(invoice_id));
            }
            InvoiceStatus::Failed => {
                self.drop_invoice();
                return Err(FlowError::InvoiceFailed(invoice_id));
            }
        }

        let tx = match &self.invoice {
            Some(invoice) => PaymentTransaction::for_invoice(invoice),
            None => return Err(FlowError::InvalidTransition { from: self.state, action: "pay" }),
        };
        self.transition(FlowState::AwaitingSignature);

        let tx_hash = match self.signer.sign_and_send(&tx).await {
            Ok(hash) => hash,
            Err(SignerError::Rejected(reason)) => {
                tracing::info!(invoice_id = %invoice_id, "Payment signature rejected");
                self.transition(FlowState::InvoicePending);
                return Err(FlowError::SignatureRejected(reason));
            }
            Err(SignerError::Unavailable(reason)) => {
                self.transition(FlowState::InvoicePending);
                return Err(FlowError::Wallet(reason));
            }
            Err(SignerError::Broadcast(reason)) => {
                self.transition(FlowState::InvoicePending);
                return Err(FlowError::Broadcast(reason));
            }
        };

        self.tx_hash = Some(tx_hash);
        self.transition(FlowState::Submitted);

        if let Err(e) = self.invoices.submit_transaction(invoice_id, tx_hash).await {
            // The settlement monitor also finds the transfer by criteria.
            tracing::warn!(invoice_id = %invoice_id, tx_hash = %tx_hash, error = %e, "Could not report transaction");
        }
        Ok(())
    }

    /// Poll the invoice until it is confirmed, fails, or the timeout passes.
    pub async fn await_confirmation(&mut self) -> Result<Uuid, FlowError> {
        if self.state == FlowState::Confirmed {
            return self.current_invoice_id();
        }
        self.expect(&[FlowState::Submitted], "await confirmation")?;
        let invoice_id = self.current_invoice_id()?;

        let mut cancelled = self.cancel.subscribe();
        let generation = *cancelled.borrow_and_update();
        if generation != self.armed {
            self.armed = generation;
            tracing::debug!(invoice_id = %invoice_id, "Cancelled before the confirmation wait began");
            return Err(FlowError::Cancelled);
        }
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            match self.invoices.fetch_status(invoice_id).await {
                Ok(InvoiceStatus::Confirmed) => {
                    self.transition(FlowState::Confirmed);
                    if let Some(invoice) = self.invoice.as_mut() {
                        invoice.status = InvoiceStatus::Confirmed;
                    }
                    tracing::info!(invoice_id = %invoice_id, "Payment confirmed");
                    return Ok(invoice_id);
                }
                Ok(InvoiceStatus::Expired) => {
                    self.drop_invoice();
                    return Err(FlowError::InvoiceExpired(invoice_id));
                }
                Ok(InvoiceStatus::Failed) => {
                    self.drop_invoice();
                    return Err(FlowError::InvoiceFailed(invoice_id));
                }
                Ok(InvoiceStatus::Pending) => {}
                Err(InvoiceError::NotFound(id)) => {
                    self.drop_invoice();
                    return Err(FlowError::Invoice(InvoiceError::NotFound(id)));
                }
                Err(e) => {
                    tracing::warn!(invoice_id = %invoice_id, error = %e, "Status check failed, will retry");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                self.transition(FlowState::TimedOut);
                return Err(FlowError::TransactionTimeout {
                    invoice_id,
                    waited: self.timeout,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancelled.changed() => {
                    self.armed = *cancelled.borrow();
                    tracing::debug!(invoice_id = %invoice_id, "Confirmation wait cancelled");
                    return Err(FlowError::Cancelled);
                }
            }
        }
    }

    /// Go back from `timed_out` to `invoice_pending`, keeping the invoice.
    pub fn retry(&mut self) -> Result<(), FlowError> {
        self.expect(&[FlowState::TimedOut], "retry")?;
        self.tx_hash = None;
        self.transition(FlowState::InvoicePending);
        Ok(())
    }

    /// Drive the flow from wherever it is to a confirmed invoice id.
    pub async fn run(&mut self) -> Result<Uuid, FlowError> {
        loop {
            match self.state {
                FlowState::Disconnected => {
                    self.connect().await?;
                }
                FlowState::WalletConnected => {
                    self.request_invoice().await?;
                }
                FlowState::InvoicePending => {
                    self.pay().await?;
                }
                FlowState::Submitted | FlowState::Confirmed => return self.await_confirmation().await,
                FlowState::AwaitingSignature | FlowState::TimedOut => {
                    return Err(FlowError::InvalidTransition {
                        from: self.state,
                        action: "run",
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::broadcast;

    use crate::blockchain::StaticObserver;
    use crate::config::InvoiceConfig;
    use crate::invoices::{InvoiceService, PaymentTerms, SettlementMonitor};
    use crate::signer::{StubOutcome, StubSigner};

    struct Fixture {
        service: Arc<InvoiceService>,
        observer: Arc<StaticObserver>,
        _shutdown: broadcast::Sender<()>,
    }

    fn fixture() -> Fixture {
        let observer = Arc::new(StaticObserver::new());
        let terms = PaymentTerms::from_config(&InvoiceConfig {
            merchant_address: "0x00000000000000000000000000000000000000aa".into(),
            token_address: "0x00000000000000000000000000000000000000bb".into(),
            ..InvoiceConfig::default()
        })
        .unwrap();
        let service = Arc::new(InvoiceService::new(terms, observer.clone()));
        let (shutdown, rx) = broadcast::channel(1);
        tokio::spawn(SettlementMonitor::new(service.clone(), Duration::from_millis(5)).run(rx));
        Fixture {
            service,
            observer,
            _shutdown: shutdown,
        }
    }

    fn payer() -> Address {
        Address::repeat_byte(0xab)
    }

    fn flow(f: &Fixture, signer: StubSigner, timeout: Duration) -> PaymentFlow {
        PaymentFlow::new(f.service.clone(), Arc::new(signer), Duration::from_millis(5), timeout)
    }

    #[tokio::test]
    async fn test_happy_path_confirms() {
        let f = fixture();
        let signer = StubSigner::new(payer()).with_observer(f.observer.clone());
        let mut flow = flow(&f, signer, Duration::from_secs(2));

        let invoice_id = flow.run().await.unwrap();
        assert_eq!(flow.state(), FlowState::Confirmed);
        assert_eq!(f.service.get_status(invoice_id).unwrap(), InvoiceStatus::Confirmed);
        assert_eq!(f.service.get(invoice_id).unwrap().tx_hash, flow.tx_hash());
    }

    #[tokio::test]
    async fn test_rejection_returns_to_invoice_pending() {
        let f = fixture();
        let signer = StubSigner::new(payer()).with_observer(f.observer.clone());
        signer.push_outcome(StubOutcome::Reject);
        let mut flow = flow(&f, signer, Duration::from_secs(2));

        flow.connect().await.unwrap();
        let invoice = flow.request_invoice().await.unwrap();
        assert!(matches!(flow.pay().await, Err(FlowError::SignatureRejected(_))));
        assert_eq!(flow.state(), FlowState::InvoicePending);
        assert_eq!(f.service.get_status(invoice.id).unwrap(), InvoiceStatus::Pending);

        // The same invoice can be paid on the next attempt.
        flow.pay().await.unwrap();
        assert_eq!(flow.await_confirmation().await.unwrap(), invoice.id);
    }

    #[tokio::test]
    async fn test_timeout_then_retry_keeps_invoice() {
        let f = fixture();
        // No observer: the transaction never shows up on chain.
        let mut flow = flow(&f, StubSigner::new(payer()), Duration::from_millis(30));

        flow.connect().await.unwrap();
        let invoice = flow.request_invoice().await.unwrap();
        flow.pay().await.unwrap();
        assert!(matches!(
            flow.await_confirmation().await,
            Err(FlowError::TransactionTimeout { .. })
        ));
        assert_eq!(flow.state(), FlowState::TimedOut);
        assert_eq!(f.service.get_status(invoice.id).unwrap(), InvoiceStatus::Pending);

        flow.retry().unwrap();
        assert_eq!(flow.state(), FlowState::InvoicePending);
        assert_eq!(flow.invoice().map(|i| i.id), Some(invoice.id));
    }

    #[tokio::test]
    async fn test_expiry_drops_invoice() {
        let f = fixture();
        let mut flow = flow(&f, StubSigner::new(payer()), Duration::from_secs(2));

        flow.connect().await.unwrap();
        flow.request_invoice().await.unwrap();
        flow.pay().await.unwrap();

        let service = f.service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            service.expire_due(u64::MAX);
        });

        assert!(matches!(flow.await_confirmation().await, Err(FlowError::InvoiceExpired(_))));
        assert_eq!(flow.state(), FlowState::WalletConnected);
        assert!(flow.invoice().is_none());
    }

    #[tokio::test]
    async fn test_reverted_payment_drops_invoice() {
        let f = fixture();
        let signer = StubSigner::new(payer()).with_observer(f.observer.clone());
        signer.push_outcome(StubOutcome::Revert);
        let mut flow = flow(&f, signer, Duration::from_secs(2));

        assert!(matches!(flow.run().await, Err(FlowError::InvoiceFailed(_))));
        assert_eq!(flow.state(), FlowState::WalletConnected);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let f = fixture();
        let mut flow = flow(&f, StubSigner::new(payer()), Duration::from_secs(30));
        flow.connect().await.unwrap();
        flow.request_invoice().await.unwrap();
        flow.pay().await.unwrap();

        let canceller = flow.canceller();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        assert!(matches!(flow.await_confirmation().await, Err(FlowError::Cancelled)));
        assert_eq!(flow.state(), FlowState::Submitted);
    }

    #[tokio::test]
    async fn test_cancel_during_signing_is_not_lost() {
        let f = fixture();
        let signer = StubSigner::new(payer()).with_observer(f.observer.clone());
        let mut flow = flow(&f, signer, Duration::from_secs(2));
        flow.connect().await.unwrap();
        let invoice = flow.request_invoice().await.unwrap();

        let canceller = flow.canceller();
        flow.pay().await.unwrap();
        // Arrives after signing began but before the wait started.
        canceller.cancel();

        assert!(matches!(flow.await_confirmation().await, Err(FlowError::Cancelled)));
        assert_eq!(flow.state(), FlowState::Submitted);

        // The cancel is consumed; waiting again proceeds to confirmation.
        assert_eq!(flow.await_confirmation().await.unwrap(), invoice.id);
    }

    #[tokio::test]
    async fn test_cancel_before_payment_does_not_leak_into_wait() {
        let f = fixture();
        let signer = StubSigner::new(payer()).with_observer(f.observer.clone());
        let mut flow = flow(&f, signer, Duration::from_secs(2));
        flow.canceller().cancel();

        assert!(flow.run().await.is_ok());
        assert_eq!(flow.state(), FlowState::Confirmed);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let f = fixture();
        let mut flow = flow(&f, StubSigner::new(payer()), Duration::from_secs(1));

        assert!(matches!(
            flow.pay().await,
            Err(FlowError::InvalidTransition { from: FlowState::Disconnected, .. })
        ));
        assert!(flow.retry().is_err());
        flow.connect().await.unwrap();
        assert!(flow.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_wallet() {
        let f = fixture();
        let mut flow = flow(&f, StubSigner::new(payer()).disconnected(), Duration::from_secs(1));
        assert!(matches!(flow.connect().await, Err(FlowError::Wallet(_))));
        assert_eq!(flow.state(), FlowState::Disconnected);
    }
}

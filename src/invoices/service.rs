//! Invoice issuance, settlement and consumption.
//!
//! All mutations of one invoice happen under its map entry lock, so
//! confirmation, expiry and consumption are atomic with respect to each other
//! and to concurrent callers. No lock is held across an `.await`.
//!
//! Lock order, where two maps are touched: `by_payer` → `invoices`, and
//! `settled_txs` → `invoices`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, TxHash};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::blockchain::{ChainObserver, ConfirmationStatus};
use crate::cache::{ResourceKind, ResponseCache};
use crate::invoices::api::InvoiceApi;
use crate::invoices::types::{Invoice, InvoiceError, InvoiceResult, InvoiceStatus, PaymentTerms};
use crate::observability::metrics;
use crate::unix_now;

/// Counts of invoices by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvoiceSummary {
    pub pending: usize,
    pub confirmed: usize,
    pub expired: usize,
    pub failed: usize,
    pub consumed: usize,
}

/// Issues invoices and tracks them to a terminal state.
pub struct InvoiceService {
    invoices: DashMap<Uuid, Invoice>,
    /// Latest invoice minted per payer.
    by_payer: DashMap<Address, Uuid>,
    /// Transactions that already confirmed an invoice.
    settled_txs: DashMap<TxHash, Uuid>,
    terms: ArcSwap<PaymentTerms>,
    observer: Arc<dyn ChainObserver>,
    cache: Option<ResponseCache>,
    persistence_path: Option<String>,
    /// Serializes snapshot writes.
    save_lock: Mutex<()>,
}

impl InvoiceService {
    pub fn new(terms: PaymentTerms, observer: Arc<dyn ChainObserver>) -> Self {
        Self {
            invoices: DashMap::new(),
            by_payer: DashMap::new(),
            settled_txs: DashMap::new(),
            terms: ArcSwap::from_pointee(terms),
            observer,
            cache: None,
            persistence_path: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Invalidate cached invoice responses on every transition.
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Load a snapshot from `path` if it exists. The snapshot is rewritten
    /// after every confirmation and consumption, and on shutdown.
    pub fn with_persistence(mut self, path: &str) -> std::io::Result<Self> {
        if Path::new(path).exists() {
            let file = File::open(path)?;
            let saved: Vec<Invoice> = serde_json::from_reader(BufReader::new(file))?;
            for invoice in saved {
                self.restore(invoice);
            }
            tracing::info!("Loaded {} invoices from {}", self.invoices.len(), path);
        }
        self.persistence_path = Some(path.to_string());
        Ok(self)
    }

    fn restore(&self, invoice: Invoice) {
        if let Some(tx_hash) = invoice.tx_hash {
            self.settled_txs.insert(tx_hash, invoice.id);
        }
        if invoice.status == InvoiceStatus::Pending && !invoice.is_consumed() {
            self.by_payer.insert(invoice.payer_address, invoice.id);
        }
        self.invoices.insert(invoice.id, invoice);
    }

    /// Write all invoices to the persistence path, if configured.
    ///
    /// The snapshot goes to a staging file first and is renamed into place.
    pub fn save_to_file(&self) -> std::io::Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot: Vec<Invoice> = self.invoices.iter().map(|r| r.value().clone()).collect();

        let staging = format!("{}.tmp", path);
        let mut writer = BufWriter::new(File::create(&staging)?);
        serde_json::to_writer(&mut writer, &snapshot)?;
        writer.flush()?;
        fs::rename(&staging, path)?;
        tracing::debug!("Saved {} invoices to {}", snapshot.len(), path);
        Ok(())
    }

    /// Save after a settlement-relevant change. A failed write is logged; the
    /// in-memory transition stands.
    fn write_through(&self) {
        if let Err(e) = self.save_to_file() {
            tracing::error!(error = %e, "Failed to persist invoices");
        }
    }

    /// Current payment terms.
    pub fn terms(&self) -> Arc<PaymentTerms> {
        self.terms.load_full()
    }

    /// Swap payment terms. Existing invoices keep the terms they were minted with.
    pub fn update_terms(&self, terms: PaymentTerms) {
        tracing::info!(amount = %terms.amount, token = %terms.token, network = %terms.network, "Payment terms updated");
        self.terms.store(Arc::new(terms));
    }

    /// Issue an invoice for `payer`, or return the one still outstanding.
    pub fn create_invoice(&self, payer: Address) -> InvoiceResult<Invoice> {
        if payer.is_zero() {
            return Err(InvoiceError::InvalidPayer("zero address".to_string()));
        }
        let now = unix_now();

        match self.by_payer.entry(payer) {
            Entry::Occupied(mut slot) => {
                if let Some(existing) = self.outstanding(*slot.get(), now) {
                    tracing::debug!(invoice_id = %existing.id, payer = %payer, "Returning outstanding invoice");
                    return Ok(existing);
                }
                let invoice = self.mint(payer, now);
                slot.insert(invoice.id);
                Ok(invoice)
            }
            Entry::Vacant(slot) => {
                let invoice = self.mint(payer, now);
                slot.insert(invoice.id);
                Ok(invoice)
            }
        }
    }

    fn outstanding(&self, id: Uuid, now: u64) -> Option<Invoice> {
        let mut invoice = self.invoices.get_mut(&id)?;
        if invoice.expire_if_due(now) {
            self.on_transition(&invoice, "expired");
        }
        invoice.is_payable(now).then(|| invoice.clone())
    }

    fn mint(&self, payer: Address, now: u64) -> Invoice {
        let invoice = Invoice::new(&self.terms.load(), payer, now);
        self.invoices.insert(invoice.id, invoice.clone());
        tracing::info!(
            invoice_id = %invoice.id,
            payer = %payer,
            amount = %invoice.amount,
            token = %invoice.token,
            "Invoice created"
        );
        metrics::record_invoice_event("created");
        invoice
    }

    /// Fetch an invoice, applying its TTL first.
    pub fn get(&self, id: Uuid) -> InvoiceResult<Invoice> {
        let mut invoice = self.invoices.get_mut(&id).ok_or(InvoiceError::NotFound(id))?;
        if invoice.expire_if_due(unix_now()) {
            self.on_transition(&invoice, "expired");
        }
        Ok(invoice.clone())
    }

    pub fn get_status(&self, id: Uuid) -> InvoiceResult<InvoiceStatus> {
        self.get(id).map(|i| i.status)
    }

    /// Record the hash the payer broadcast so settlement can check it directly.
    pub fn report_transaction(&self, id: Uuid, tx_hash: TxHash) -> InvoiceResult<Invoice> {
        let mut invoice = self.invoices.get_mut(&id).ok_or(InvoiceError::NotFound(id))?;
        if invoice.expire_if_due(unix_now()) {
            self.on_transition(&invoice, "expired");
        }
        if invoice.status != InvoiceStatus::Pending {
            return Err(InvoiceError::NotPending {
                id,
                status: invoice.status,
            });
        }
        invoice.reported_tx_hash = Some(tx_hash);
        tracing::info!(invoice_id = %id, tx_hash = %tx_hash, "Payment transaction reported");
        self.invalidate(id);
        Ok(invoice.clone())
    }

    /// Transition pending → confirmed, recording the settling transaction.
    pub fn confirm(&self, id: Uuid, tx_hash: TxHash) -> InvoiceResult<Invoice> {
        let now = unix_now();

        let claimed = match self.settled_txs.entry(tx_hash) {
            Entry::Occupied(owner) if *owner.get() != id => {
                return Err(InvoiceError::TransactionAlreadyUsed(tx_hash));
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        };

        let result = self.confirm_claimed(id, tx_hash, now);
        match &result {
            Ok(_) => self.write_through(),
            Err(_) if claimed => {
                self.settled_txs.remove_if(&tx_hash, |_, owner| *owner == id);
            }
            Err(_) => {}
        }
        result
    }

    fn confirm_claimed(&self, id: Uuid, tx_hash: TxHash, now: u64) -> InvoiceResult<Invoice> {
        let mut invoice = self.invoices.get_mut(&id).ok_or(InvoiceError::NotFound(id))?;
        if invoice.expire_if_due(now) {
            self.on_transition(&invoice, "expired");
        }
        if invoice.status != InvoiceStatus::Pending {
            return Err(InvoiceError::NotPending {
                id,
                status: invoice.status,
            });
        }

        invoice.status = InvoiceStatus::Confirmed;
        invoice.confirmed_at = Some(now);
        invoice.tx_hash = Some(tx_hash);
        self.on_transition(&invoice, "confirmed");
        Ok(invoice.clone())
    }

    /// Transition pending → failed.
    pub fn mark_failed(&self, id: Uuid, reason: &str) -> InvoiceResult<Invoice> {
        let mut invoice = self.invoices.get_mut(&id).ok_or(InvoiceError::NotFound(id))?;
        if invoice.status != InvoiceStatus::Pending {
            return Err(InvoiceError::NotPending {
                id,
                status: invoice.status,
            });
        }
        invoice.status = InvoiceStatus::Failed;
        tracing::warn!(invoice_id = %id, reason = %reason, "Invoice payment failed");
        self.on_transition(&invoice, "failed");
        Ok(invoice.clone())
    }

    /// Expire every pending invoice whose TTL elapsed at `now`.
    pub fn expire_due(&self, now: u64) -> Vec<Uuid> {
        let due: Vec<Uuid> = self
            .invoices
            .iter()
            .filter(|r| r.status == InvoiceStatus::Pending && now >= r.expires_at)
            .map(|r| *r.key())
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if let Some(mut invoice) = self.invoices.get_mut(&id) {
                if invoice.expire_if_due(now) {
                    self.on_transition(&invoice, "expired");
                    expired.push(id);
                }
            }
        }
        expired
    }

    /// Ids of invoices still waiting for payment.
    pub fn pending_ids(&self) -> Vec<Uuid> {
        self.invoices
            .iter()
            .filter(|r| r.status == InvoiceStatus::Pending)
            .map(|r| *r.key())
            .collect()
    }

    /// Ask the chain observer whether `id` has been paid and apply the answer.
    pub async fn check_settlement(&self, id: Uuid) -> InvoiceResult<InvoiceStatus> {
        let invoice = self.get(id)?;
        if invoice.status != InvoiceStatus::Pending {
            return Ok(invoice.status);
        }

        let query = invoice.transfer_query();
        let observed = self
            .observer
            .get_transaction(&query)
            .await
            .map_err(|e| InvoiceError::Unavailable(e.to_string()))?;

        match observed {
            ConfirmationStatus::Confirmed { tx_hash, .. } => match self.confirm(id, tx_hash) {
                Ok(confirmed) => Ok(confirmed.status),
                Err(InvoiceError::TransactionAlreadyUsed(_)) => {
                    tracing::warn!(invoice_id = %id, tx_hash = %tx_hash, "Matched transfer already settled another invoice");
                    if invoice.reported_tx_hash == Some(tx_hash) {
                        self.clear_reported(id, tx_hash);
                    }
                    self.get_status(id)
                }
                Err(InvoiceError::NotPending { status, .. }) => Ok(status),
                Err(e) => Err(e),
            },
            ConfirmationStatus::Failed(reason) if query.tx_hash.is_some() => {
                match self.mark_failed(id, &reason) {
                    Ok(failed) => Ok(failed.status),
                    Err(InvoiceError::NotPending { status, .. }) => Ok(status),
                    Err(e) => Err(e),
                }
            }
            ConfirmationStatus::Mismatch(reason) => {
                tracing::warn!(invoice_id = %id, reason = %reason, "Reported transaction does not pay invoice");
                if let Some(reported) = query.tx_hash {
                    self.clear_reported(id, reported);
                }
                self.get_status(id)
            }
            other => {
                tracing::debug!(invoice_id = %id, observed = ?other, "Invoice not settled yet");
                Ok(InvoiceStatus::Pending)
            }
        }
    }

    fn clear_reported(&self, id: Uuid, tx_hash: TxHash) {
        if let Some(mut invoice) = self.invoices.get_mut(&id) {
            if invoice.reported_tx_hash == Some(tx_hash) {
                invoice.reported_tx_hash = None;
                self.invalidate(id);
            }
        }
    }

    /// Re-check the recorded settlement of a confirmed invoice on chain.
    pub async fn verify_settlement(&self, invoice: &Invoice) -> InvoiceResult<bool> {
        let Some(tx_hash) = invoice.tx_hash else {
            return Ok(false);
        };
        let query = invoice.transfer_query().with_hash(tx_hash);
        let observed = self
            .observer
            .get_transaction(&query)
            .await
            .map_err(|e| InvoiceError::Unavailable(e.to_string()))?;
        Ok(matches!(observed, ConfirmationStatus::Confirmed { tx_hash: seen, .. } if seen == tx_hash))
    }

    /// Mark a confirmed invoice as used by `job_id`. Exactly one caller wins.
    pub fn consume(&self, id: Uuid, job_id: Uuid) -> InvoiceResult<Invoice> {
        let consumed = self.consume_locked(id, job_id)?;
        self.write_through();
        Ok(consumed)
    }

    fn consume_locked(&self, id: Uuid, job_id: Uuid) -> InvoiceResult<Invoice> {
        let mut invoice = self.invoices.get_mut(&id).ok_or(InvoiceError::NotFound(id))?;
        if invoice.expire_if_due(unix_now()) {
            self.on_transition(&invoice, "expired");
        }

        match invoice.status {
            InvoiceStatus::Confirmed if invoice.is_consumed() => Err(InvoiceError::AlreadyConsumed(id)),
            InvoiceStatus::Confirmed => {
                invoice.consumed_by = Some(job_id);
                tracing::info!(invoice_id = %id, job_id = %job_id, "Invoice consumed");
                metrics::record_invoice_event("consumed");
                self.invalidate(id);
                Ok(invoice.clone())
            }
            InvoiceStatus::Expired => Err(InvoiceError::Expired(id)),
            status => Err(InvoiceError::NotConfirmed { id, status }),
        }
    }

    /// Drop invoices that can no longer change or be used, once `retention_secs`
    /// have passed since they settled or lapsed. Pending invoices and
    /// confirmed ones not yet consumed are kept. Returns how many were removed.
    pub fn prune(&self, now: u64, retention_secs: u64) -> usize {
        let mut removed = Vec::new();
        self.invoices.retain(|_, invoice| {
            let done_at = match invoice.status {
                InvoiceStatus::Confirmed if invoice.is_consumed() => invoice.confirmed_at,
                InvoiceStatus::Expired | InvoiceStatus::Failed => Some(invoice.expires_at),
                _ => None,
            };
            let stale = done_at.is_some_and(|at| now >= at.saturating_add(retention_secs));
            if stale {
                removed.push((invoice.id, invoice.payer_address, invoice.tx_hash));
            }
            !stale
        });

        // Settled hashes go with their invoice; a replayed transfer still
        // predates any newer invoice and cannot settle it.
        for (id, payer, tx_hash) in &removed {
            self.by_payer.remove_if(payer, |_, latest| latest == id);
            if let Some(tx_hash) = tx_hash {
                self.settled_txs.remove_if(tx_hash, |_, owner| owner == id);
            }
            self.invalidate(*id);
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Pruned settled invoices");
            self.write_through();
        }
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }

    pub fn summary(&self) -> InvoiceSummary {
        let mut summary = InvoiceSummary::default();
        for r in self.invoices.iter() {
            match r.status {
                InvoiceStatus::Pending => summary.pending += 1,
                InvoiceStatus::Confirmed => summary.confirmed += 1,
                InvoiceStatus::Expired => summary.expired += 1,
                InvoiceStatus::Failed => summary.failed += 1,
            }
            if r.is_consumed() {
                summary.consumed += 1;
            }
        }
        summary
    }

    fn on_transition(&self, invoice: &Invoice, event: &'static str) {
        tracing::info!(invoice_id = %invoice.id, status = %invoice.status, "Invoice {}", event);
        metrics::record_invoice_event(event);
        self.invalidate(invoice.id);
    }

    fn invalidate(&self, id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate(ResourceKind::Invoice, id);
        }
    }
}

#[async_trait]
impl InvoiceApi for InvoiceService {
    async fn request_invoice(&self, payer: Address) -> InvoiceResult<Invoice> {
        self.create_invoice(payer)
    }

    async fn fetch_status(&self, id: Uuid) -> InvoiceResult<InvoiceStatus> {
        self.get_status(id)
    }

    async fn submit_transaction(&self, id: Uuid, tx_hash: TxHash) -> InvoiceResult<()> {
        self.report_transaction(id, tx_hash).map(|_| ())
    }
}

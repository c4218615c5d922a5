//! Background settlement of pending invoices.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::invoices::service::InvoiceService;
use crate::invoices::types::InvoiceStatus;
use crate::observability::metrics;
use crate::unix_now;

/// Periodically expires stale invoices and checks pending ones on chain.
pub struct SettlementMonitor {
    service: Arc<InvoiceService>,
    interval: Duration,
}

impl SettlementMonitor {
    pub fn new(service: Arc<InvoiceService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Starting settlement monitor");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    tracing::info!("Settlement monitor stopped");
                    return;
                }
            }
        }
    }

    /// One pass: expire due invoices, then check every pending one.
    pub async fn tick(&self) {
        let expired = self.service.expire_due(unix_now());
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Expired invoices");
        }

        let pending = self.service.pending_ids();
        metrics::record_pending_invoices(pending.len());

        for id in pending {
            match self.service.check_settlement(id).await {
                Ok(InvoiceStatus::Pending) => {}
                Ok(status) => tracing::debug!(invoice_id = %id, status = %status, "Invoice settled"),
                Err(e) => {
                    // Chain outage: stop this pass, the next tick retries.
                    tracing::warn!(invoice_id = %id, error = %e, "Settlement check failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::StaticObserver;
    use crate::config::InvoiceConfig;
    use crate::invoices::types::PaymentTerms;
    use alloy::primitives::{Address, U256};

    #[tokio::test]
    async fn test_tick_confirms_paid_invoice() {
        let observer = Arc::new(StaticObserver::new());
        let terms = PaymentTerms::from_config(&InvoiceConfig {
            merchant_address: "0x00000000000000000000000000000000000000aa".into(),
            token_address: "0x00000000000000000000000000000000000000bb".into(),
            ..InvoiceConfig::default()
        })
        .unwrap();
        let service = Arc::new(InvoiceService::new(terms, observer.clone()));
        let payer = Address::repeat_byte(0x42);
        let paid = service.create_invoice(payer).unwrap();
        let unpaid = service.create_invoice(Address::repeat_byte(0x43)).unwrap();

        observer.confirm_transfer_from(payer, U256::from(100_000u64));
        let monitor = SettlementMonitor::new(service.clone(), Duration::from_millis(10));
        monitor.tick().await;

        assert_eq!(service.get_status(paid.id).unwrap(), InvoiceStatus::Confirmed);
        assert_eq!(service.get_status(unpaid.id).unwrap(), InvoiceStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let observer = Arc::new(StaticObserver::new());
        let terms = PaymentTerms::from_config(&InvoiceConfig::default()).unwrap();
        let service = Arc::new(InvoiceService::new(terms, observer));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(SettlementMonitor::new(service, Duration::from_millis(5)).run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}

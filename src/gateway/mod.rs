//! Request gateway.
//!
//! Decides whether a target needs payment, answers with a payment challenge
//! when it does and no valid proof was supplied, and otherwise consumes the
//! invoice and admits a job.
//!
//! # Admission
//! ```text
//! submit(target, proof?)
//!   ├─ invalid target                     → Validation
//!   ├─ free (policy or free host)         → Admitted
//!   ├─ no proof                           → PaymentRequired(challenge)
//!   ├─ unknown invoice                    → InvoiceNotFound
//!   ├─ expired                            → InvoiceExpired
//!   ├─ pending / failed                   → PaymentRequired(challenge)
//!   ├─ consumed                           → InvoiceAlreadyConsumed
//!   ├─ re-verification fails              → PaymentVerification
//!   └─ confirmed → consume → create job   → Admitted
//! ```

pub mod target;

use std::collections::HashSet;
use std::sync::Arc;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::invoices::{InvoiceError, InvoiceService, InvoiceStatus, PaymentTerms};
use crate::jobs::{JobRunner, JobStatus};
use crate::observability::metrics;

pub use target::normalize_target;

/// What the client must pay before resubmitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChallenge {
    pub amount: String,
    pub token: String,
    pub network: String,
    pub merchant_address: Address,
    pub token_address: Address,
}

impl PaymentChallenge {
    pub fn from_terms(terms: &PaymentTerms) -> Self {
        Self {
            amount: terms.amount.clone(),
            token: terms.token.clone(),
            network: terms.network.clone(),
            merchant_address: terms.merchant_address,
            token_address: terms.token_address,
        }
    }
}

/// Outcome of a submission that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted { job_id: Uuid, status: JobStatus },
    PaymentRequired(PaymentChallenge),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error("invoice {0} has expired")]
    InvoiceExpired(Uuid),

    #[error("invoice {0} was already used")]
    InvoiceAlreadyConsumed(Uuid),

    #[error("payment verification failed: {0}")]
    PaymentVerification(String),

    /// The chain could not be queried to verify payment.
    #[error("payment verification unavailable: {0}")]
    Unavailable(String),
}

pub struct Gateway {
    config: GatewayConfig,
    free_hosts: HashSet<String>,
    invoices: Arc<InvoiceService>,
    runner: JobRunner,
}

impl Gateway {
    pub fn new(config: GatewayConfig, invoices: Arc<InvoiceService>, runner: JobRunner) -> Self {
        let free_hosts = config.free_hosts.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        Self {
            config,
            free_hosts,
            invoices,
            runner,
        }
    }

    /// The challenge a client receives without valid proof.
    pub fn challenge(&self) -> PaymentChallenge {
        PaymentChallenge::from_terms(&self.invoices.terms())
    }

    fn requires_payment(&self, host: &str) -> bool {
        self.config.payment_required && !self.free_hosts.contains(host)
    }

    /// Admit an analysis of `target`, or say what payment is needed.
    pub async fn submit(&self, target: &str, proof: Option<Uuid>) -> Result<Admission, GatewayError> {
        let url = normalize_target(target, self.config.max_target_len).map_err(GatewayError::Validation)?;
        let host = url.host_str().unwrap_or_default().to_string();

        if !self.requires_payment(&host) {
            metrics::record_admission("free");
            return Ok(self.admit(url.to_string(), None));
        }

        let Some(invoice_id) = proof else {
            tracing::debug!(target = %url, "Payment required, no proof supplied");
            metrics::record_admission("challenged");
            return Ok(Admission::PaymentRequired(self.challenge()));
        };

        let invoice = self.invoices.get(invoice_id).map_err(|e| self.reject(e))?;
        match invoice.status {
            InvoiceStatus::Expired => return Err(self.reject(InvoiceError::Expired(invoice_id))),
            InvoiceStatus::Pending | InvoiceStatus::Failed => {
                tracing::debug!(invoice_id = %invoice_id, status = %invoice.status, "Proof is not a confirmed invoice");
                metrics::record_admission("challenged");
                return Ok(Admission::PaymentRequired(self.challenge()));
            }
            InvoiceStatus::Confirmed if invoice.is_consumed() => {
                return Err(self.reject(InvoiceError::AlreadyConsumed(invoice_id)));
            }
            InvoiceStatus::Confirmed => {}
        }

        if self.config.reverify_on_admit {
            match self.invoices.verify_settlement(&invoice).await {
                Ok(true) => {}
                Ok(false) => {
                    metrics::record_admission("verification_failed");
                    tracing::warn!(invoice_id = %invoice_id, tx_hash = ?invoice.tx_hash, "Settlement no longer confirmed on chain");
                    return Err(GatewayError::PaymentVerification(format!(
                        "settlement of invoice {} is not confirmed on chain",
                        invoice_id
                    )));
                }
                Err(e) => {
                    metrics::record_admission("verification_failed");
                    return Err(GatewayError::Unavailable(e.to_string()));
                }
            }
        }

        let job_id = Uuid::new_v4();
        self.invoices.consume(invoice_id, job_id).map_err(|e| self.reject(e))?;
        metrics::record_admission("paid");
        Ok(self.admit_with_id(job_id, url.to_string(), Some(invoice_id)))
    }

    fn admit(&self, target: String, invoice_id: Option<Uuid>) -> Admission {
        self.admit_with_id(Uuid::new_v4(), target, invoice_id)
    }

    fn admit_with_id(&self, job_id: Uuid, target: String, invoice_id: Option<Uuid>) -> Admission {
        let job = self.runner.store().create_with_id(job_id, target, invoice_id);
        self.runner.dispatch(job.id);
        Admission::Admitted {
            job_id: job.id,
            status: job.status,
        }
    }

    fn reject(&self, error: InvoiceError) -> GatewayError {
        metrics::record_admission("rejected");
        match error {
            InvoiceError::NotFound(id) => GatewayError::InvoiceNotFound(id),
            InvoiceError::Expired(id) => GatewayError::InvoiceExpired(id),
            InvoiceError::AlreadyConsumed(id) => GatewayError::InvoiceAlreadyConsumed(id),
            InvoiceError::NotConfirmed { id, status } => {
                GatewayError::PaymentVerification(format!("invoice {} is {}", id, status))
            }
            other => GatewayError::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use alloy::primitives::{TxHash, U256};
    use tokio::sync::broadcast;

    use crate::blockchain::{ConfirmationStatus, StaticObserver};
    use crate::config::InvoiceConfig;
    use crate::jobs::{JobStore, SimulatedExecutor};

    struct Fixture {
        gateway: Arc<Gateway>,
        invoices: Arc<InvoiceService>,
        observer: Arc<StaticObserver>,
        jobs: Arc<JobStore>,
    }

    fn fixture(config: GatewayConfig) -> Fixture {
        let observer = Arc::new(StaticObserver::new());
        let terms = PaymentTerms::from_config(&InvoiceConfig {
            merchant_address: "0x00000000000000000000000000000000000000aa".into(),
            token_address: "0x00000000000000000000000000000000000000bb".into(),
            ..InvoiceConfig::default()
        })
        .unwrap();
        let invoices = Arc::new(InvoiceService::new(terms, observer.clone()));
        let jobs = Arc::new(JobStore::new(vec!["seo".into(), "report".into()]));
        let (tx, _) = broadcast::channel(1);
        let runner = JobRunner::new(
            Arc::new(SimulatedExecutor::new(Duration::from_secs(60))),
            jobs.clone(),
            tx,
        );
        Fixture {
            gateway: Arc::new(Gateway::new(config, invoices.clone(), runner)),
            invoices,
            observer,
            jobs,
        }
    }

    fn paid_invoice(f: &Fixture) -> Uuid {
        let payer = Address::repeat_byte(0x11);
        let invoice = f.invoices.create_invoice(payer).unwrap();
        let tx_hash = f.observer.confirm_transfer_from(payer, U256::from(100_000u64));
        f.invoices.confirm(invoice.id, tx_hash).unwrap();
        invoice.id
    }

    #[tokio::test]
    async fn test_challenge_without_proof() {
        let f = fixture(GatewayConfig::default());
        let admission = f.gateway.submit("example.com", None).await.unwrap();
        match admission {
            Admission::PaymentRequired(c) => {
                assert_eq!(c.amount, "0.10");
                assert_eq!(c.token, "USDT0");
                assert_eq!(c.network, "plasma");
                assert!(!c.merchant_address.is_zero());
            }
            other => panic!("expected challenge, got {:?}", other),
        }
        assert!(f.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_validation_error() {
        let f = fixture(GatewayConfig::default());
        assert!(matches!(
            f.gateway.submit("ftp://example.com", None).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_free_host_admitted() {
        let f = fixture(GatewayConfig {
            free_hosts: vec!["Demo.Example.com".into()],
            ..GatewayConfig::default()
        });
        let admission = f.gateway.submit("demo.example.com", None).await.unwrap();
        assert!(matches!(admission, Admission::Admitted { status: JobStatus::Pending, .. }));
    }

    #[tokio::test]
    async fn test_paid_admission_once() {
        let f = fixture(GatewayConfig::default());
        let invoice_id = paid_invoice(&f);

        let admission = f.gateway.submit("example.com", Some(invoice_id)).await.unwrap();
        let Admission::Admitted { job_id, status } = admission else {
            panic!("expected admission");
        };
        assert_eq!(status, JobStatus::Pending);
        assert_eq!(f.jobs.get(job_id).unwrap().invoice_id, Some(invoice_id));
        assert_eq!(f.invoices.get(invoice_id).unwrap().consumed_by, Some(job_id));

        assert!(matches!(
            f.gateway.submit("example.com", Some(invoice_id)).await,
            Err(GatewayError::InvoiceAlreadyConsumed(id)) if id == invoice_id
        ));
    }

    #[tokio::test]
    async fn test_distinct_proof_errors() {
        let f = fixture(GatewayConfig::default());

        let unknown = Uuid::new_v4();
        assert!(matches!(
            f.gateway.submit("example.com", Some(unknown)).await,
            Err(GatewayError::InvoiceNotFound(id)) if id == unknown
        ));

        let pending = f.invoices.create_invoice(Address::repeat_byte(0x22)).unwrap();
        assert!(matches!(
            f.gateway.submit("example.com", Some(pending.id)).await,
            Ok(Admission::PaymentRequired(_))
        ));

        f.invoices.expire_due(u64::MAX);
        assert!(matches!(
            f.gateway.submit("example.com", Some(pending.id)).await,
            Err(GatewayError::InvoiceExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_reverify_refuses_vanished_settlement() {
        let f = fixture(GatewayConfig::default());
        let invoice = f.invoices.create_invoice(Address::repeat_byte(0x33)).unwrap();
        let tx_hash = TxHash::repeat_byte(0x44);
        f.invoices.confirm(invoice.id, tx_hash).unwrap();
        f.observer.set_transaction(tx_hash, ConfirmationStatus::NotFound);

        assert!(matches!(
            f.gateway.submit("example.com", Some(invoice.id)).await,
            Err(GatewayError::PaymentVerification(_))
        ));
        // Not consumed: the client may retry once the chain agrees.
        assert!(!f.invoices.get(invoice.id).unwrap().is_consumed());
    }

    #[tokio::test]
    async fn test_concurrent_submits_single_admission() {
        let f = fixture(GatewayConfig::default());
        let invoice_id = paid_invoice(&f);

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let gateway = f.gateway.clone();
            tasks.push(tokio::spawn(async move {
                gateway.submit("example.com", Some(invoice_id)).await
            }));
        }

        let mut admitted = 0;
        let mut consumed = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(Admission::Admitted { .. }) => admitted += 1,
                Err(GatewayError::InvoiceAlreadyConsumed(_)) => consumed += 1,
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(consumed, 11);
        assert_eq!(f.jobs.len(), 1);
    }
}

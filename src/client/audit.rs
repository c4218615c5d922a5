//! End-to-end paid audit: challenge, pay, resubmit, track, fetch report.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::client::{ApiClient, ClientError};
use crate::config::{FlowConfig, TrackerConfig};
use crate::flow::{FlowError, PaymentFlow};
use crate::gateway::Admission;
use crate::signer::WalletSigner;
use crate::tracker::{ProgressTracker, TrackerEvent, TrackerRegistry};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Payment(#[from] FlowError),

    #[error("server still requires payment after invoice {0} was confirmed")]
    StillChallenged(Uuid),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("analysis {job_id} failed: {reason}")]
    JobFailed { job_id: Uuid, reason: String },

    #[error("lost track of job {job_id}: {message}")]
    Tracking { job_id: Uuid, message: String },
}

#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub job_id: Uuid,
    /// Invoice paid for this audit, if payment was required.
    pub invoice_id: Option<Uuid>,
    pub report: Value,
}

/// Run one audit of `target`, paying with `signer` if the server asks.
///
/// `on_event` sees every tracker event, e.g. to print progress.
pub async fn run_paid_audit<F>(
    client: Arc<ApiClient>,
    signer: Arc<dyn WalletSigner>,
    target: &str,
    flow_config: &FlowConfig,
    tracker_config: &TrackerConfig,
    mut on_event: F,
) -> Result<AuditOutcome, AuditError>
where
    F: FnMut(&TrackerEvent),
{
    let (job_id, invoice_id) = match client.submit(target, None).await? {
        Admission::Admitted { job_id, .. } => (job_id, None),
        Admission::PaymentRequired(challenge) => {
            tracing::info!(
                amount = %challenge.amount,
                token = %challenge.token,
                network = %challenge.network,
                "Payment required"
            );
            let mut flow = PaymentFlow::from_config(client.clone(), signer, flow_config);
            let invoice_id = flow.run().await?;

            match client.submit(target, Some(invoice_id)).await? {
                Admission::Admitted { job_id, .. } => (job_id, Some(invoice_id)),
                Admission::PaymentRequired(_) => return Err(AuditError::StillChallenged(invoice_id)),
            }
        }
    };
    tracing::info!(job_id = %job_id, "Analysis admitted");

    let registry = TrackerRegistry::new(Arc::new(ProgressTracker::new(client.clone(), tracker_config)));
    let mut events = registry.start(job_id).ok_or_else(|| AuditError::Tracking {
        job_id,
        message: "job is already being tracked".to_string(),
    })?;

    let mut outcome = Err(AuditError::Tracking {
        job_id,
        message: "tracking ended without a result".to_string(),
    });
    while let Some(event) = events.recv().await {
        on_event(&event);
        outcome = match event {
            TrackerEvent::Progress(_) => continue,
            TrackerEvent::Completed(_) => Ok(()),
            TrackerEvent::Failed(_) => {
                let reason = match client.report(job_id).await {
                    Err(ClientError::Api { message, .. }) => message,
                    _ => "analysis failed".to_string(),
                };
                Err(AuditError::JobFailed { job_id, reason })
            }
            TrackerEvent::NotFound(id) => Err(AuditError::JobNotFound(id)),
            TrackerEvent::Error(message) => Err(AuditError::Tracking { job_id, message }),
        };
        break;
    }
    registry.stop(job_id);
    outcome?;

    let report = client.report(job_id).await?;
    Ok(AuditOutcome {
        job_id,
        invoice_id,
        report,
    })
}

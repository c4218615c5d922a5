//! HTTP client for the paygate API.
//!
//! Implements [`InvoiceApi`] and [`ProgressSource`] so the payment flow and
//! the progress tracker run unchanged against a remote server.

pub mod audit;

use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::gateway::{Admission, PaymentChallenge};
use crate::invoices::{Invoice, InvoiceApi, InvoiceError, InvoiceResult, InvoiceStatus};
use crate::jobs::{AnalysisProgress, JobStatus};
use crate::tracker::{ProgressSource, SourceError};

pub use audit::{run_paid_audit, AuditError, AuditOutcome};

/// Header carrying the proof-of-payment invoice id.
pub const INVOICE_HEADER: &str = "x-invoice-id";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{status} {kind}: {message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            ClientError::InvalidUrl(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AdmittedBody {
    job_id: Uuid,
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: InvoiceStatus,
}

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    admin_key: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base,
            admin_key: None,
        })
    }

    pub fn with_admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(Self::api_error(status, response).await)
    }

    async fn api_error(status: StatusCode, response: Response) -> ClientError {
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => ClientError::Api {
                status: status.as_u16(),
                kind: body.error,
                message: body.message,
            },
            Err(_) => ClientError::Api {
                status: status.as_u16(),
                kind: "http_error".to_string(),
                message: text,
            },
        }
    }

    /// `POST /analyze`, optionally with proof of payment.
    pub async fn submit(&self, target: &str, proof: Option<Uuid>) -> Result<Admission, ClientError> {
        let mut request = self.http.post(self.url("analyze")?).json(&json!({ "url": target }));
        if let Some(invoice_id) = proof {
            request = request.header(INVOICE_HEADER, invoice_id.to_string());
        }
        let response = request.send().await?;

        if response.status() == StatusCode::PAYMENT_REQUIRED {
            let body: Value = response.json().await?;
            if let Some(kind) = body.get("error").and_then(Value::as_str) {
                return Err(ClientError::Api {
                    status: 402,
                    kind: kind.to_string(),
                    message: body.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
                });
            }
            let challenge: PaymentChallenge = serde_json::from_value(body).map_err(|e| ClientError::Api {
                status: 402,
                kind: "invalid_challenge".to_string(),
                message: e.to_string(),
            })?;
            return Ok(Admission::PaymentRequired(challenge));
        }

        let admitted: AdmittedBody = Self::decode(response).await?;
        Ok(Admission::Admitted {
            job_id: admitted.job_id,
            status: admitted.status,
        })
    }

    pub async fn create_invoice(&self, payer: Address) -> Result<Invoice, ClientError> {
        let response = self
            .http
            .post(self.url("invoices")?)
            .json(&json!({ "payer_address": payer }))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn invoice(&self, id: Uuid) -> Result<Invoice, ClientError> {
        let response = self.http.get(self.url(&format!("invoices/{}", id))?).send().await?;
        Self::decode(response).await
    }

    pub async fn invoice_status(&self, id: Uuid) -> Result<InvoiceStatus, ClientError> {
        let response = self.http.get(self.url(&format!("invoices/{}", id))?).send().await?;
        let body: StatusBody = Self::decode(response).await?;
        Ok(body.status)
    }

    pub async fn report_transaction(&self, id: Uuid, tx_hash: TxHash) -> Result<InvoiceStatus, ClientError> {
        let response = self
            .http
            .post(self.url(&format!("invoices/{}/transaction", id))?)
            .json(&json!({ "tx_hash": tx_hash }))
            .send()
            .await?;
        let body: StatusBody = Self::decode(response).await?;
        Ok(body.status)
    }

    pub async fn progress(&self, job_id: Uuid) -> Result<AnalysisProgress, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("analysis/{}/progress", job_id))?)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn report(&self, job_id: Uuid) -> Result<Value, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("analysis/{}/report", job_id))?)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        let response = self.http.get(self.url("health")?).send().await?;
        Self::decode(response).await
    }

    /// `GET /admin/{path}` with the bearer key.
    pub async fn admin(&self, path: &str) -> Result<Value, ClientError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.admin_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ClientError::InvalidUrl(format!("admin key: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        let response = self
            .http
            .get(self.url(&format!("admin/{}", path))?)
            .headers(headers)
            .send()
            .await?;
        Self::decode(response).await
    }
}

fn to_invoice_error(id: Option<Uuid>, error: ClientError) -> InvoiceError {
    match (error.status(), id) {
        (Some(404), Some(id)) => InvoiceError::NotFound(id),
        (Some(410), Some(id)) => InvoiceError::Expired(id),
        (Some(400), _) => InvoiceError::InvalidPayer(error.to_string()),
        _ => InvoiceError::Unavailable(error.to_string()),
    }
}

#[async_trait]
impl InvoiceApi for ApiClient {
    async fn request_invoice(&self, payer: Address) -> InvoiceResult<Invoice> {
        self.create_invoice(payer).await.map_err(|e| to_invoice_error(None, e))
    }

    async fn fetch_status(&self, id: Uuid) -> InvoiceResult<InvoiceStatus> {
        self.invoice_status(id).await.map_err(|e| to_invoice_error(Some(id), e))
    }

    async fn submit_transaction(&self, id: Uuid, tx_hash: TxHash) -> InvoiceResult<()> {
        self.report_transaction(id, tx_hash)
            .await
            .map(|_| ())
            .map_err(|e| to_invoice_error(Some(id), e))
    }
}

#[async_trait]
impl ProgressSource for ApiClient {
    async fn fetch_progress(&self, job_id: Uuid) -> Result<AnalysisProgress, SourceError> {
        self.progress(job_id).await.map_err(|e| match e.status() {
            Some(404) => SourceError::NotFound(job_id),
            _ => SourceError::Transient(e.to_string()),
        })
    }
}

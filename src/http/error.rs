//! Mapping of domain errors onto HTTP responses.
//!
//! Every error body is `{"error": <kind>, "message": <text>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::gateway::GatewayError;
use crate::invoices::InvoiceError;
use crate::jobs::JobError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(kind = self.kind, message = %self.message, "Request failed");
        }
        (
            self.status,
            Json(json!({ "error": self.kind, "message": self.message })),
        )
            .into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let message = e.to_string();
        match e {
            GatewayError::Validation(_) => Self::new(StatusCode::BAD_REQUEST, "validation_error", message),
            GatewayError::InvoiceNotFound(_) => Self::new(StatusCode::NOT_FOUND, "invoice_not_found", message),
            GatewayError::InvoiceExpired(_) => Self::new(StatusCode::GONE, "invoice_expired", message),
            GatewayError::InvoiceAlreadyConsumed(_) => {
                Self::new(StatusCode::CONFLICT, "invoice_already_consumed", message)
            }
            GatewayError::PaymentVerification(_) => {
                Self::new(StatusCode::PAYMENT_REQUIRED, "payment_verification_failed", message)
            }
            GatewayError::Unavailable(_) => Self::new(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", message),
        }
    }
}

impl From<InvoiceError> for ApiError {
    fn from(e: InvoiceError) -> Self {
        let message = e.to_string();
        match e {
            InvoiceError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "invoice_not_found", message),
            InvoiceError::Expired(_) => Self::new(StatusCode::GONE, "invoice_expired", message),
            InvoiceError::AlreadyConsumed(_) => Self::new(StatusCode::CONFLICT, "invoice_already_consumed", message),
            InvoiceError::NotConfirmed { .. } => Self::new(StatusCode::CONFLICT, "invoice_not_confirmed", message),
            InvoiceError::NotPending { .. } => Self::new(StatusCode::CONFLICT, "invoice_not_pending", message),
            InvoiceError::TransactionAlreadyUsed(_) => {
                Self::new(StatusCode::CONFLICT, "transaction_already_used", message)
            }
            InvoiceError::InvalidPayer(_) => Self::validation(message),
            InvoiceError::InvalidTerms(_) => Self::internal(message),
            InvoiceError::Unavailable(_) => Self::new(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", message),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        let message = e.to_string();
        match e {
            JobError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "job_not_found", message),
            JobError::NotReady { .. } => Self::new(StatusCode::CONFLICT, "job_processing", message),
            JobError::Failed { .. } => Self::new(StatusCode::UNPROCESSABLE_ENTITY, "job_failed", message),
            _ => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::invoices::InvoiceStatus;
    use crate::jobs::JobStatus;

    #[test]
    fn test_status_codes() {
        let id = Uuid::new_v4();
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (GatewayError::Validation("bad".into()).into(), StatusCode::BAD_REQUEST, "validation_error"),
            (GatewayError::InvoiceNotFound(id).into(), StatusCode::NOT_FOUND, "invoice_not_found"),
            (GatewayError::InvoiceExpired(id).into(), StatusCode::GONE, "invoice_expired"),
            (GatewayError::InvoiceAlreadyConsumed(id).into(), StatusCode::CONFLICT, "invoice_already_consumed"),
            (
                GatewayError::PaymentVerification("gone".into()).into(),
                StatusCode::PAYMENT_REQUIRED,
                "payment_verification_failed",
            ),
            (
                InvoiceError::NotPending { id, status: InvoiceStatus::Expired }.into(),
                StatusCode::CONFLICT,
                "invoice_not_pending",
            ),
            (JobError::NotFound(id).into(), StatusCode::NOT_FOUND, "job_not_found"),
            (
                JobError::NotReady { id, status: JobStatus::Processing }.into(),
                StatusCode::CONFLICT,
                "job_processing",
            ),
            (
                JobError::Failed { id, reason: "boom".into() }.into(),
                StatusCode::UNPROCESSABLE_ENTITY,
                "job_failed",
            ),
        ];
        for (error, status, kind) in cases {
            assert_eq!(error.status, status, "{}", kind);
            assert_eq!(error.kind, kind);
        }
    }
}

//! Public API handlers.

use alloy::primitives::{Address, TxHash};
use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::ResourceKind;
use crate::gateway::Admission;
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::unix_now;

/// Header carrying the proof-of-payment invoice id.
pub const X_INVOICE_ID: &str = "x-invoice-id";

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub payer_address: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionReport {
    pub tx_hash: String,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| ApiError::validation(e.body_text()))
}

fn path_id(id: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    id.map(|Path(id)| id).map_err(|e| ApiError::validation(e.body_text()))
}

fn proof_header(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
    let Some(value) = headers.get(X_INVOICE_ID) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| ApiError::validation("X-Invoice-Id is not valid text"))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(text)
        .map(Some)
        .map_err(|e| ApiError::validation(format!("X-Invoice-Id '{}' is not an invoice id: {}", text, e)))
}

/// Read `kind/id` through the response cache.
fn cached<F>(state: &AppState, kind: ResourceKind, id: Uuid, load: F) -> Result<Value, ApiError>
where
    F: FnOnce() -> Result<Value, ApiError>,
{
    let Some(cache) = &state.cache else {
        return load();
    };
    if let Some(hit) = cache.get(kind, id) {
        return Ok(hit);
    }
    // A transition during `load` bumps the generation and the fill is dropped.
    let generation = cache.generation(kind, id);
    let value = load()?;
    cache.put_if_current(kind, id, generation, value.clone());
    Ok(value)
}

/// `POST /analyze`
pub async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body(payload)?;
    let proof = proof_header(&headers)?;

    match state.gateway.submit(&request.url, proof).await? {
        Admission::Admitted { job_id, status } => {
            Ok((StatusCode::OK, Json(json!({ "job_id": job_id, "status": status }))).into_response())
        }
        Admission::PaymentRequired(challenge) => Ok((StatusCode::PAYMENT_REQUIRED, Json(challenge)).into_response()),
    }
}

/// `POST /invoices`
pub async fn create_invoice(
    State(state): State<AppState>,
    payload: Result<Json<InvoiceRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body(payload)?;
    let payer: Address = request
        .payer_address
        .trim()
        .parse()
        .map_err(|e| ApiError::validation(format!("payer_address '{}': {}", request.payer_address, e)))?;

    let invoice = state.invoices.create_invoice(payer)?;
    Ok((StatusCode::CREATED, Json(invoice)).into_response())
}

/// `GET /invoices/{id}`
pub async fn get_invoice(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = path_id(id)?;

    // A cached pending entry past its expiry must go through the service,
    // which applies the TTL.
    if let Some(cache) = &state.cache {
        if let Some(hit) = cache.get(ResourceKind::Invoice, id) {
            let overdue = hit["status"] == "pending"
                && hit["expires_at"].as_u64().is_some_and(|at| unix_now() >= at);
            if !overdue {
                return Ok(Json(hit));
            }
            cache.invalidate(ResourceKind::Invoice, id);
        }
    }

    let value = cached(&state, ResourceKind::Invoice, id, || {
        let invoice = state.invoices.get(id)?;
        serde_json::to_value(invoice).map_err(|e| ApiError::internal(e.to_string()))
    })?;
    Ok(Json(value))
}

/// `POST /invoices/{id}/transaction`
pub async fn report_transaction(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<TransactionReport>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = path_id(id)?;
    let report = body(payload)?;
    let tx_hash: TxHash = report
        .tx_hash
        .trim()
        .parse()
        .map_err(|e| ApiError::validation(format!("tx_hash '{}': {}", report.tx_hash, e)))?;

    let invoice = state.invoices.report_transaction(id, tx_hash)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "invoice_id": invoice.id, "status": invoice.status })),
    )
        .into_response())
}

/// `GET /analysis/{id}/progress`
pub async fn get_progress(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = path_id(id)?;
    let value = cached(&state, ResourceKind::Progress, id, || {
        let progress = state.jobs.progress(id)?;
        serde_json::to_value(progress).map_err(|e| ApiError::internal(e.to_string()))
    })?;
    Ok(Json(value))
}

/// `GET /analysis/{id}/report`
pub async fn get_report(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = path_id(id)?;
    let value = cached(&state, ResourceKind::Report, id, || Ok(state.jobs.report(id)?))?;
    Ok(Json(value))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_proof_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(proof_header(&headers).unwrap(), None);

        let id = Uuid::new_v4();
        headers.insert(X_INVOICE_ID, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(proof_header(&headers).unwrap(), Some(id));

        headers.insert(X_INVOICE_ID, HeaderValue::from_static("not-an-id"));
        let err = proof_header(&headers).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}

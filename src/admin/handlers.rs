use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::http::server::AppState;
use crate::invoices::InvoiceSummary;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub blockchain_healthy: Option<bool>,
}

#[derive(Serialize)]
pub struct Summary {
    pub invoices: InvoiceSummary,
    pub jobs: Value,
    pub cache_entries: usize,
    pub terms: Value,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let blockchain_healthy = match &state.blockchain {
        Some(client) => Some(client.is_healthy().await),
        None => None,
    };
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        blockchain_healthy,
    })
}

pub async fn get_summary(State(state): State<AppState>) -> Json<Summary> {
    let mut jobs = serde_json::Map::new();
    for (status, count) in state.jobs.counts() {
        jobs.insert(status.to_string(), json!(count));
    }
    let terms = state.invoices.terms();

    Json(Summary {
        invoices: state.invoices.summary(),
        jobs: Value::Object(jobs),
        cache_entries: state.cache.as_ref().map(|c| c.len()).unwrap_or(0),
        terms: json!({
            "amount": terms.amount,
            "token": terms.token,
            "network": terms.network,
            "merchant_address": terms.merchant_address,
            "ttl_secs": terms.ttl_secs,
        }),
    })
}

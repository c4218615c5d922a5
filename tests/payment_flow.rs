//! End-to-end payment and analysis flow against a live server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use audit_paygate::client::{run_paid_audit, ApiClient, ClientError, INVOICE_HEADER};
use audit_paygate::gateway::Admission;
use audit_paygate::invoices::InvoiceStatus;
use audit_paygate::jobs::JobStatus;
use audit_paygate::signer::{StubOutcome, StubSigner, WalletSigner};
use audit_paygate::tracker::TrackerEvent;

mod common;

#[tokio::test]
async fn test_unpaid_request_gets_challenge() {
    let app = common::spawn_app().await;

    let res = reqwest::Client::new()
        .post(app.url("/analyze"))
        .json(&json!({ "url": "example.com" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 402);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["amount"], "0.10");
    assert_eq!(body["token"], "USDT0");
    assert_eq!(body["network"], "plasma");
    assert_eq!(body["merchant_address"].as_str().unwrap().to_lowercase(), common::MERCHANT);
    assert!(app.state.jobs.is_empty());
}

#[tokio::test]
async fn test_paid_audit_end_to_end() {
    let app = common::spawn_app().await;
    let client = Arc::new(ApiClient::new(&app.base_url).unwrap());
    let signer: Arc<dyn WalletSigner> =
        Arc::new(StubSigner::new(common::payer(0x11)).with_observer(app.observer.clone()));

    let mut events = Vec::new();
    let outcome = run_paid_audit(
        client.clone(),
        signer,
        "https://example.com/page",
        &common::fast_flow(),
        &common::fast_tracker(),
        |event| events.push(event.clone()),
    )
    .await
    .unwrap();

    let invoice_id = outcome.invoice_id.expect("payment was required");
    let invoice = client.invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Confirmed);
    assert_eq!(invoice.consumed_by, Some(outcome.job_id));

    assert!(outcome.report.is_object());
    assert!(matches!(events.last(), Some(TrackerEvent::Completed(_))));

    let progress = client.progress(outcome.job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.completion_percentage, 100);

    // The same invoice cannot buy a second analysis.
    let err = client
        .submit("https://example.com/other", Some(invoice_id))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));
}

#[tokio::test]
async fn test_unreported_transfer_settles_invoice() {
    let app = common::spawn_app().await;
    let client = ApiClient::new(&app.base_url).unwrap();
    let payer = common::payer(0x22);

    let invoice = client.create_invoice(payer).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);

    // Still pending: proof is answered with a fresh challenge.
    let admission = client.submit("example.com", Some(invoice.id)).await.unwrap();
    assert!(matches!(admission, Admission::PaymentRequired(_)));

    app.observer.confirm_transfer_from(payer, app.amount_units());

    let mut status = InvoiceStatus::Pending;
    for _ in 0..100 {
        status = client.invoice_status(invoice.id).await.unwrap();
        if status != InvoiceStatus::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, InvoiceStatus::Confirmed);

    let res = reqwest::Client::new()
        .post(app.url("/analyze"))
        .header(INVOICE_HEADER, invoice.id.to_string())
        .json(&json!({ "url": "example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    assert!(body["job_id"].is_string());
}

#[tokio::test]
async fn test_repeat_invoice_request_reuses_outstanding() {
    let app = common::spawn_app().await;
    let client = ApiClient::new(&app.base_url).unwrap();
    let payer = common::payer(0x33);

    let first = client.create_invoice(payer).await.unwrap();
    let second = client.create_invoice(payer).await.unwrap();
    assert_eq!(first.id, second.id);

    let other = client.create_invoice(common::payer(0x34)).await.unwrap();
    assert_ne!(first.id, other.id);
}

#[tokio::test]
async fn test_rejected_signature_leaves_invoice_pending() {
    let app = common::spawn_app().await;
    let client = Arc::new(ApiClient::new(&app.base_url).unwrap());
    let stub = StubSigner::new(common::payer(0x44)).with_observer(app.observer.clone());
    stub.push_outcome(StubOutcome::Reject);
    let signer: Arc<dyn WalletSigner> = Arc::new(stub);

    let err = run_paid_audit(
        client.clone(),
        signer,
        "example.com",
        &common::fast_flow(),
        &common::fast_tracker(),
        |_| {},
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("rejected"), "{}", err);
    assert_eq!(app.state.invoices.summary().pending, 1);
    assert!(app.state.jobs.is_empty());
}

#[tokio::test]
async fn test_free_host_skips_payment() {
    let mut config = common::test_config();
    config.gateway.free_hosts = vec!["free.example".to_string()];
    let app = common::spawn_app_with(config).await;
    let client = ApiClient::new(&app.base_url).unwrap();

    match client.submit("https://free.example/", None).await.unwrap() {
        Admission::Admitted { status, .. } => assert_eq!(status, JobStatus::Pending),
        other => panic!("expected admission, got {:?}", other),
    }
    match client.submit("https://paid.example/", None).await {
        Ok(Admission::PaymentRequired(_)) => {}
        other => panic!("expected challenge, got {:?}", other.map_err(|e: ClientError| e.to_string())),
    }
}

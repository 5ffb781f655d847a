//! HTTP remote store against a mock server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use billbook_core::{Identity, Money, PaymentMode, StoreKind};
use billbook_sync::{HttpRemoteStore, RemoteError, RemoteStore};

fn store(server: &MockServer) -> HttpRemoteStore {
    HttpRemoteStore::new(
        &format!("{}/v1", server.uri()),
        Some("secret-token"),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn create_sends_idempotency_key_and_returns_token() {
    let server = MockServer::start().await;
    let local = Identity::new_local();

    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .and(header("Idempotency-Key", local.to_string().as_str()))
        .and(header("Authorization", "Bearer secret-token"))
        .and(body_json(json!({ "amount": 500 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "PAY-77" })))
        .expect(1)
        .mount(&server)
        .await;

    let id = store(&server)
        .create(StoreKind::Payments, &local, r#"{"amount":500}"#)
        .await
        .unwrap();

    assert_eq!(id, Identity::remote("PAY-77"));
}

#[tokio::test]
async fn client_errors_are_rejections_with_the_server_reason() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(json!({ "message": "amount exceeds outstanding" })),
        )
        .mount(&server)
        .await;

    let err = store(&server)
        .create(StoreKind::Payments, &Identity::new_local(), "{}")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RemoteError::Rejected {
            status: 422,
            reason: "amount exceeds outstanding".into()
        }
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/invoices/INV-1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = store(&server)
        .update(StoreKind::Invoices, &Identity::remote("INV-1"), "{}")
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn deleting_a_missing_record_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/payments/PAY-9"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    store(&server)
        .delete(StoreKind::Payments, &Identity::remote("PAY-9"))
        .await
        .unwrap();
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = HttpRemoteStore::new(&server.uri(), None, Duration::from_secs(1)).unwrap();
    let err = client.ping().await.unwrap_err();

    assert_eq!(err, RemoteError::Timeout(1));
}

#[tokio::test]
async fn listing_maps_remote_records_to_confirmed_payments() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/invoices/INV-1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "PAY-1",
                "party_id": "party-1",
                "amount": 25000,
                "mode": "bank",
                "payment_date": "2024-07-02",
                "reference": "UTR-88",
                "created_at": "2024-07-02T10:00:00Z"
            }
        ])))
        .mount(&server)
        .await;

    let invoice = Identity::remote("INV-1");
    let payments = store(&server).list_payments(&invoice).await.unwrap();

    assert_eq!(payments.len(), 1);
    let payment = &payments[0];
    assert_eq!(payment.id, Identity::remote("PAY-1"));
    assert_eq!(payment.invoice_id, invoice);
    assert_eq!(payment.amount, Money::from_minor(25_000));
    assert_eq!(payment.mode, PaymentMode::Bank);
    assert!(!payment.pending_sync);
    assert!(payment.synced_at.is_some());
}

#[tokio::test]
async fn listing_a_local_invoice_makes_no_call() {
    let server = MockServer::start().await;

    let payments = store(&server)
        .list_payments(&Identity::new_local())
        .await
        .unwrap();

    assert!(payments.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

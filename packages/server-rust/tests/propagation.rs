//! End-to-end tenant propagation: HTTP request -> publish -> listener.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tenantflow_core::{ContextStore, Propagation, PropagationConfig};
use tenantflow_server::demo::{self, C2bPayment, PaymentLedger};
use tenantflow_server::messaging::{Broker, InMemoryBroker, MessageTemplate, MessagingConfig, RunningListener};
use tenantflow_server::network::{NetworkConfig, NetworkModule, TenantRouter};
use tower::ServiceExt;

struct Harness {
    router: TenantRouter,
    propagation: Propagation,
    ledger: Arc<PaymentLedger>,
    listeners: Vec<RunningListener>,
}

impl Harness {
    fn new() -> Self {
        let propagation =
            Propagation::with_store(PropagationConfig::default(), Arc::new(ContextStore::new())).unwrap();
        let config = MessagingConfig {
            reply_timeout: Duration::from_secs(2),
            ..MessagingConfig::default()
        };
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(&config));
        let ledger = Arc::new(PaymentLedger::new());
        let listeners = demo::start_listeners(&broker, &propagation, &config, Arc::clone(&ledger)).unwrap();

        let template = MessageTemplate::new(Arc::clone(&broker), propagation.clone(), &config);
        let module = NetworkModule::new(NetworkConfig::default(), template, propagation.clone());

        Self {
            router: module.build_router(),
            propagation,
            ledger,
            listeners,
        }
    }

    async fn call(&self, req: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn wait_for_payments(&self, count: usize) {
        for _ in 0..400 {
            if self.ledger.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} payments, got {}", self.ledger.len());
    }

    async fn shutdown(mut self) {
        for listener in &mut self.listeners {
            listener.stop().await;
        }
        assert!(self.propagation.store().is_empty(), "bindings left behind");
    }
}

fn c2b_request(uri: &str, transaction_id: &str) -> Request<Body> {
    let payment = C2bPayment {
        transaction_id: transaction_id.to_string(),
        transaction_date: None,
        amount: 1_500.0,
        tenant_id: None,
    };
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&payment).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn payment_is_processed_under_the_request_tenant() {
    let harness = Harness::new();

    let (status, body) = harness.call(c2b_request("/api/v1/c2b?tenantId=t12601", "TX-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Received");

    harness.wait_for_payments(1).await;
    let entries = harness.ledger.entries();
    assert_eq!(entries[0].tenant.as_str(), "t12601");
    assert_eq!(entries[0].payment.transaction_id, "TX-1");

    harness.shutdown().await;
}

#[tokio::test]
async fn payment_without_tenant_is_accepted_but_not_recorded() {
    let harness = Harness::new();

    let (status, body) = harness.call(c2b_request("/api/v1/c2b", "TX-2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Received");

    // A tenanted payment published afterwards proves the first one was consumed.
    harness.call(c2b_request("/api/v1/c2b?tenantId=t2", "TX-3")).await;
    harness.wait_for_payments(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let entries = harness.ledger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payment.transaction_id, "TX-3");

    harness.shutdown().await;
}

#[tokio::test]
async fn hello_round_trips_over_request_reply() {
    let harness = Harness::new();

    let (status, body) = harness.call(get("/api/v1/hello/Mini")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Hello Mini");

    harness.shutdown().await;
}

#[tokio::test]
async fn tenant_endpoint_reflects_only_the_current_request() {
    let harness = Harness::new();

    assert_eq!(harness.call(get("/api/v1/tenant?tenantId=acme")).await.1, "acme");
    assert_eq!(harness.call(get("/api/v1/tenant")).await.1, "none");
    assert_eq!(harness.call(get("/api/v1/tenant?tenantId=")).await.1, "none");

    harness.shutdown().await;
}

#[tokio::test]
async fn malformed_payment_is_rejected_and_unbound() {
    let harness = Harness::new();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/c2b?tenantId=t1")
        .header("content-type", "application/json")
        .body(Body::from("{\"amount\":"))
        .unwrap();
    let (status, _) = harness.call(req).await;
    assert!(status.is_client_error());
    assert!(harness.ledger.is_empty());

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tenants_never_mix() {
    let harness = Arc::new(Harness::new());

    let requests: Vec<_> = (0..32)
        .map(|i| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                let uri = format!("/api/v1/c2b?tenantId=tenant-{i}");
                let (status, _) = harness.call(c2b_request(&uri, &format!("tx-{i}"))).await;
                assert_eq!(status, StatusCode::OK);
            })
        })
        .collect();
    for request in requests {
        request.await.unwrap();
    }

    harness.wait_for_payments(32).await;
    for entry in harness.ledger.entries() {
        let suffix = entry.payment.transaction_id.trim_start_matches("tx-");
        assert_eq!(entry.tenant.as_str(), format!("tenant-{suffix}"));
    }

    let Ok(harness) = Arc::try_unwrap(harness) else {
        panic!("harness still shared");
    };
    harness.shutdown().await;
}

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::Utc;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use loyalty_core::{Order, OrderNumber, OrderOutcome, OrderStatus, UserId};
use loyalty_infra::scoring::ScoringReply;
use loyalty_infra::{
    HttpScoringClient, InMemoryLedgerStore, LedgerStore, OrderReconciler, ReconcileExit,
    ReconcilerConfig, ScoringClient, ScoringClientConfig, ScoringError,
};

/// Fake scoring service: answers by order number.
///
/// - `1234567897`: PROCESSED with 42.5 points after two PROCESSING replies
/// - `618304455`: always 429 with `Retry-After: 7`
/// - `1847803446726`: 204
/// - `4099013600418229`: INVALID
/// - `79927398713`: responds after 2 seconds
struct FakeScoring {
    base_url: String,
    hits: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

async fn score(State(hits): State<Arc<AtomicUsize>>, Path(number): Path<String>) -> Response {
    let n = hits.fetch_add(1, Ordering::SeqCst);
    match number.as_str() {
        "1234567897" if n < 2 => axum::Json(serde_json::json!({
            "order": number,
            "status": "PROCESSING",
        }))
        .into_response(),
        "1234567897" => axum::Json(serde_json::json!({
            "order": number,
            "status": "PROCESSED",
            "accrual": 42.5,
        }))
        .into_response(),
        "618304455" => {
            let mut headers = HeaderMap::new();
            headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
            (
                StatusCode::TOO_MANY_REQUESTS,
                headers,
                "No more than 10 requests per minute allowed",
            )
                .into_response()
        }
        "4099013600418229" => axum::Json(serde_json::json!({
            "order": number,
            "status": "INVALID",
        }))
        .into_response(),
        "79927398713" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            StatusCode::NO_CONTENT.into_response()
        }
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

impl FakeScoring {
    async fn spawn() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/api/orders/:number", get(score))
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            // No scheme on purpose: the client accepts bare host:port.
            base_url: addr.to_string(),
            hits,
            handle,
        }
    }

    fn client(&self) -> HttpScoringClient {
        HttpScoringClient::new(
            &ScoringClientConfig::new(self.base_url.clone())
                .with_request_timeout(Duration::from_millis(500)),
        )
        .unwrap()
    }
}

impl Drop for FakeScoring {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn number(n: &str) -> OrderNumber {
    OrderNumber::parse(n).unwrap()
}

#[tokio::test]
async fn classifies_live_responses() {
    let fake = FakeScoring::spawn().await;
    let client = fake.client();

    let reply = client
        .fetch(&number("4099013600418229"))
        .await
        .unwrap()
        .classify(&number("4099013600418229"));
    let ScoringReply::Report(report) = reply else {
        panic!("expected report, got {reply:?}");
    };
    assert_eq!(report.outcome(), Some(OrderOutcome::Invalid));

    let limited = client.fetch(&number("618304455")).await.unwrap();
    assert_eq!(
        limited.classify(&number("618304455")),
        ScoringReply::RateLimited {
            retry_after: Some(Duration::from_secs(7))
        }
    );

    let unknown = client.fetch(&number("1847803446726")).await.unwrap();
    assert_eq!(unknown.classify(&number("1847803446726")), ScoringReply::Unknown);
}

#[tokio::test]
async fn slow_responses_time_out() {
    let fake = FakeScoring::spawn().await;
    let err = fake.client().fetch(&number("79927398713")).await.unwrap_err();
    assert!(matches!(err, ScoringError::Timeout), "got {err:?}");
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpScoringClient::new(&ScoringClientConfig::new(format!("http://{addr}"))).unwrap();
    let err = client.fetch(&number("1234567897")).await.unwrap_err();
    assert!(matches!(err, ScoringError::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn reconciles_against_live_service() {
    loyalty_observability::init_pretty();
    let fake = FakeScoring::spawn().await;
    let store = Arc::new(InMemoryLedgerStore::new());
    let owner = UserId::new();
    store
        .insert_order(&Order::new(number("1234567897"), owner, Utc::now()))
        .await
        .unwrap();

    let reconciler = OrderReconciler::new(
        store.clone(),
        Arc::new(fake.client()),
        ReconcilerConfig {
            poll_interval: Duration::from_millis(20),
            ..ReconcilerConfig::default()
        },
    );

    let exit = tokio::time::timeout(
        Duration::from_secs(5),
        reconciler.run(number("1234567897"), CancellationToken::new()),
    )
    .await
    .expect("reconciliation did not finish");

    assert_eq!(
        exit,
        ReconcileExit::Completed(OrderOutcome::Processed { accrual: dec!(42.5) })
    );
    assert_eq!(fake.hits.load(Ordering::SeqCst), 3);

    let order = store.order(&number("1234567897")).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processed);
    assert_eq!(order.accrual, Some(dec!(42.5)));
    assert_eq!(
        store.balance(owner).await.unwrap().current,
        dec!(42.5)
    );
}

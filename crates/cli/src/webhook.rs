//! # Webhook server
//!
//! Real-time reconciliation for payment processors. Builds the axum router
//! served by `kosha serve`.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                              |
//! |--------|------------------------|------------------------------------------|
//! | GET    | `/health`              | Proxies the Kosha API health probe       |
//! | POST   | `/webhook/transaction` | Reconcile one payment immediately        |
//! | POST   | `/webhook/batch`       | Reconcile a list of payments             |
//!
//! The SDK is blocking, so every upstream call runs on tokio's blocking pool.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;

use kosha_client::import::DEFAULT_CLIENT_ID;
use kosha_client::{
    HealthStatus, KoshaClient, KoshaError, NoProgress, ProcessingSummary, ReconcileResponse,
    Transaction, TransactionResult,
};

/// Source system recorded on transactions received over a webhook.
pub const WEBHOOK_SOURCE: &str = "WEBHOOK";

// ---------------------------------------------------------------------------
// Upstream seam
// ---------------------------------------------------------------------------

/// The reconciliation calls the webhook handlers need.
///
/// Implemented by [`KoshaClient`]; tests plug in an in-memory stub.
pub trait Reconciler: Send + Sync + 'static {
    fn health_check(&self) -> Result<HealthStatus, KoshaError>;
    fn reconcile_one(&self, transaction: &Transaction) -> Result<ReconcileResponse, KoshaError>;
    fn reconcile_many(&self, transactions: &[Transaction]) -> ProcessingSummary;
}

impl Reconciler for KoshaClient {
    fn health_check(&self) -> Result<HealthStatus, KoshaError> {
        KoshaClient::health_check(self)
    }

    fn reconcile_one(&self, transaction: &Transaction) -> Result<ReconcileResponse, KoshaError> {
        KoshaClient::reconcile_one(self, transaction)
    }

    fn reconcile_many(&self, transactions: &[Transaction]) -> ProcessingSummary {
        KoshaClient::reconcile_many(self, transactions, false, &NoProgress)
    }
}

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all handlers. Cheap to clone.
pub struct AppState<R> {
    pub reconciler: Arc<R>,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self { reconciler: Arc::clone(&self.reconciler) }
    }
}

pub fn create_router<R: Reconciler>(reconciler: Arc<R>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<R>))
        .route("/webhook/transaction", post(transaction_handler::<R>))
        .route("/webhook/batch", post(batch_handler::<R>))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { reconciler })
}

// ---------------------------------------------------------------------------
// Payload mapping
// ---------------------------------------------------------------------------

/// Map a payment processor payload to a [`Transaction`].
///
/// Required: `payment_id`, `amount`, `currency`, `created_at`.
/// Optional: `description`, `metadata`.
pub fn payment_to_transaction(payment: &Value) -> Result<Transaction, KoshaError> {
    let payment_id = match required(payment, "payment_id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(invalid_field("payment_id")),
    };
    let amount = required(payment, "amount")?
        .as_f64()
        .ok_or_else(|| invalid_field("amount"))?;
    let currency = required(payment, "currency")?
        .as_str()
        .ok_or_else(|| invalid_field("currency"))?;
    let created_at = required(payment, "created_at")?
        .as_str()
        .ok_or_else(|| invalid_field("created_at"))?;

    let transaction_date = created_at.split('T').next().unwrap_or(created_at);
    let description = payment
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut context_data = Map::new();
    context_data.insert("transaction_date".into(), Value::String(transaction_date.into()));
    context_data.insert("description".into(), Value::String(description.into()));
    if let Some(metadata) = payment.get("metadata").filter(|m| !m.is_null()) {
        context_data.insert("metadata".into(), metadata.clone());
    }

    let mut txn = Transaction::new(DEFAULT_CLIENT_ID, payment_id);
    txn.event_timestamp = created_at.to_string();
    txn.execution_timestamp = created_at.to_string();
    txn.ledger_a_amount = amount;
    txn.currency = currency.to_string();
    txn.source_system_id = WEBHOOK_SOURCE.to_string();
    txn.context_data = context_data;
    Ok(txn)
}

fn required<'a>(payment: &'a Value, field: &str) -> Result<&'a Value, KoshaError> {
    payment
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| KoshaError::InvalidInput(format!("Missing required field: {field}")))
}

fn invalid_field(field: &str) -> KoshaError {
    KoshaError::InvalidInput(format!("Invalid field: {field}"))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BatchResponse {
    batch_id: Value,
    total: usize,
    matched: usize,
    exceptions: usize,
    failed: usize,
    results: Vec<TransactionResult>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error(details: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error", "details": details.to_string() })),
    )
        .into_response()
}

/// Decode a JSON request body, rejecting other content types.
fn json_body(headers: &HeaderMap, body: &Bytes) -> Result<Value, Response> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("application/json"));
    if !is_json {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Content-Type must be application/json",
        ));
    }
    serde_json::from_slice(body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler<R: Reconciler>(State(state): State<AppState<R>>) -> Response {
    let reconciler = Arc::clone(&state.reconciler);
    match tokio::task::spawn_blocking(move || reconciler.health_check()).await {
        Ok(Ok(health)) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "kosha_api": health.status })),
        )
            .into_response(),
        Ok(Err(e)) => {
            tracing::error!("health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "error": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// `POST /webhook/transaction`
async fn transaction_handler<R: Reconciler>(
    State(state): State<AppState<R>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = match json_body(&headers, &body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    tracing::info!(
        "received transaction: {}",
        payload.get("payment_id").unwrap_or(&serde_json::Value::Null)
    );

    let txn = match payment_to_transaction(&payload) {
        Ok(t) => t,
        Err(KoshaError::InvalidInput(msg)) => {
            tracing::warn!("{}", msg);
            return error_response(StatusCode::BAD_REQUEST, msg);
        }
        Err(e) => return internal_error(e),
    };

    let reconciler = Arc::clone(&state.reconciler);
    let id = txn.transaction_id.clone();
    let outcome = tokio::task::spawn_blocking(move || reconciler.reconcile_one(&txn)).await;

    match outcome {
        Ok(Ok(result)) if !result.exception_flag => {
            tracing::info!(
                "transaction {} matched (reason: {}, confidence: {})",
                id,
                result.reason_code,
                result.confidence
            );
            Json(json!({
                "status": "matched",
                "reason_code": result.reason_code,
                "confidence": result.confidence,
                "audit_hash": result.audit_hash,
            }))
            .into_response()
        }
        Ok(Ok(result)) => {
            tracing::warn!("transaction {} requires review ({})", id, result.reason_code);
            Json(json!({
                "status": "requires_review",
                "reason_code": result.reason_code,
                "confidence": result.confidence,
                "message": "Transaction flagged for manual review",
            }))
            .into_response()
        }
        Ok(Err(e)) => {
            tracing::error!("error processing transaction {}: {}", id, e);
            internal_error(e)
        }
        Err(e) => internal_error(e),
    }
}

/// `POST /webhook/batch`
async fn batch_handler<R: Reconciler>(
    State(state): State<AppState<R>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = match json_body(&headers, &body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let batch_id = payload.get("batch_id").cloned().unwrap_or(Value::Null);

    let payments = match payload.get("transactions").and_then(Value::as_array) {
        Some(list) if !list.is_empty() => list,
        _ => return error_response(StatusCode::BAD_REQUEST, "No transactions provided"),
    };

    let txns = match payments
        .iter()
        .map(payment_to_transaction)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(t) => t,
        Err(KoshaError::InvalidInput(msg)) => {
            return error_response(StatusCode::BAD_REQUEST, msg);
        }
        Err(e) => return internal_error(e),
    };

    tracing::info!("processing batch {} with {} transactions", batch_id, txns.len());

    let reconciler = Arc::clone(&state.reconciler);
    let summary = match tokio::task::spawn_blocking(move || reconciler.reconcile_many(&txns)).await
    {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };

    let exceptions = summary.exceptions();
    let matched = summary.results.len() - exceptions;
    for failed in &summary.failed_batches {
        tracing::error!("batch {}: {}", batch_id, failed.error);
    }
    tracing::info!(
        "batch {} complete: {} matched, {} exceptions, {} failed",
        batch_id,
        matched,
        exceptions,
        summary.failed
    );

    Json(BatchResponse {
        batch_id,
        total: summary.total_transactions,
        matched,
        exceptions,
        failed: summary.failed,
        results: summary.results,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    /// In-memory upstream: flags any amount over 1000 as an exception.
    #[derive(Default)]
    struct StubReconciler {
        down: bool,
        seen: Mutex<Vec<Transaction>>,
    }

    impl StubReconciler {
        fn decide(txn: &Transaction) -> ReconcileResponse {
            let exception = txn.ledger_a_amount > 1000.0;
            ReconcileResponse {
                audit_hash: format!("hash-{}", txn.transaction_id),
                exception_flag: exception,
                reason_code: if exception { "AMOUNT_MISMATCH" } else { "NONE" }.into(),
                confidence: if exception { 0.4 } else { 0.95 },
                confidence_raw: None,
                explainability_features: Map::new(),
            }
        }
    }

    impl Reconciler for StubReconciler {
        fn health_check(&self) -> Result<HealthStatus, KoshaError> {
            if self.down {
                return Err(KoshaError::Network("connection refused".into()));
            }
            Ok(HealthStatus { status: "ok".into(), model_loaded: Some(true), extra: Map::new() })
        }

        fn reconcile_one(&self, transaction: &Transaction) -> Result<ReconcileResponse, KoshaError> {
            self.seen.lock().unwrap().push(transaction.clone());
            if self.down {
                return Err(KoshaError::Http { status: 502, detail: "upstream down".into() });
            }
            Ok(Self::decide(transaction))
        }

        fn reconcile_many(&self, transactions: &[Transaction]) -> ProcessingSummary {
            let results = transactions
                .iter()
                .map(|t| {
                    let r = Self::decide(t);
                    TransactionResult {
                        transaction_id: t.transaction_id.clone(),
                        audit_hash: r.audit_hash,
                        exception_flag: r.exception_flag,
                        reason_code: r.reason_code,
                        confidence: r.confidence,
                        confidence_raw: r.confidence_raw,
                        explainability_features: r.explainability_features,
                        request_timestamp: "2025-01-15T10:30:00+00:00".into(),
                        response_timestamp: "2025-01-15T10:30:00+00:00".into(),
                    }
                })
                .collect::<Vec<_>>();
            ProcessingSummary {
                total_transactions: transactions.len(),
                successful: results.len(),
                failed: 0,
                failed_batches: vec![],
                invalid_hashes: vec![],
                elapsed: Duration::from_millis(5),
                results,
            }
        }
    }

    fn payment(id: &str, amount: f64) -> Value {
        json!({
            "payment_id": id,
            "amount": amount,
            "currency": "USD",
            "created_at": "2025-01-15T10:30:00Z",
            "description": "Payment from customer",
            "metadata": {"order": 42}
        })
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        send(router, req).await
    }

    #[test]
    fn payment_mapping() {
        let txn = payment_to_transaction(&payment("pay_123", 100.5)).unwrap();
        assert_eq!(txn.transaction_id, "pay_123");
        assert_eq!(txn.ledger_a_amount, 100.5);
        assert_eq!(txn.currency, "USD");
        assert_eq!(txn.event_timestamp, "2025-01-15T10:30:00Z");
        assert_eq!(txn.execution_timestamp, "2025-01-15T10:30:00Z");
        assert_eq!(txn.source_system_id, "WEBHOOK");
        assert_eq!(txn.context_data["transaction_date"], "2025-01-15");
        assert_eq!(txn.context_data["description"], "Payment from customer");
        assert_eq!(txn.context_data["metadata"]["order"], 42);
    }

    #[test]
    fn payment_mapping_names_missing_field() {
        let mut p = payment("pay_1", 1.0);
        p.as_object_mut().unwrap().remove("currency");
        let err = payment_to_transaction(&p).unwrap_err();
        assert_eq!(err.to_string(), "invalid input: Missing required field: currency");
    }

    #[tokio::test]
    async fn health_reports_upstream_status() {
        let router = create_router(Arc::new(StubReconciler::default()));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "healthy", "kosha_api": "ok"}));
    }

    #[tokio::test]
    async fn health_unavailable_when_upstream_down() {
        let router = create_router(Arc::new(StubReconciler { down: true, ..Default::default() }));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn clean_transaction_is_matched() {
        let stub = Arc::new(StubReconciler::default());
        let router = create_router(Arc::clone(&stub));
        let (status, body) =
            post_json(&router, "/webhook/transaction", payment("pay_123", 100.5)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "matched");
        assert_eq!(body["reason_code"], "NONE");
        assert_eq!(body["audit_hash"], "hash-pay_123");

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].source_system_id, "WEBHOOK");
    }

    #[tokio::test]
    async fn exception_requires_review() {
        let router = create_router(Arc::new(StubReconciler::default()));
        let (status, body) =
            post_json(&router, "/webhook/transaction", payment("pay_big", 5000.0)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "requires_review");
        assert_eq!(body["reason_code"], "AMOUNT_MISMATCH");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn missing_field_is_bad_request() {
        let router = create_router(Arc::new(StubReconciler::default()));
        let (status, body) = post_json(
            &router,
            "/webhook/transaction",
            json!({"payment_id": "pay_1", "currency": "USD", "created_at": "2025-01-15"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required field: amount");
    }

    #[tokio::test]
    async fn non_json_content_type_is_rejected() {
        let router = create_router(Arc::new(StubReconciler::default()));
        let req = Request::builder()
            .method("POST")
            .uri("/webhook/transaction")
            .header("content-type", "text/plain")
            .body(Body::from("payment_id=pay_1"))
            .unwrap();
        let (status, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Content-Type must be application/json");
    }

    #[tokio::test]
    async fn upstream_failure_is_internal_error() {
        let router = create_router(Arc::new(StubReconciler { down: true, ..Default::default() }));
        let (status, body) =
            post_json(&router, "/webhook/transaction", payment("pay_1", 10.0)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(body["details"].as_str().unwrap().contains("upstream down"));
    }

    #[tokio::test]
    async fn batch_summarizes_results() {
        let router = create_router(Arc::new(StubReconciler::default()));
        let (status, body) = post_json(
            &router,
            "/webhook/batch",
            json!({
                "batch_id": "batch_123",
                "transactions": [payment("p1", 10.0), payment("p2", 2000.0), payment("p3", 30.0)]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["batch_id"], "batch_123");
        assert_eq!(body["total"], 3);
        assert_eq!(body["matched"], 2);
        assert_eq!(body["exceptions"], 1);
        assert_eq!(body["failed"], 0);
        assert_eq!(body["results"][1]["transaction_id"], "p2");
        assert_eq!(body["results"][1]["exception_flag"], true);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let router = create_router(Arc::new(StubReconciler::default()));
        let (status, body) = post_json(
            &router,
            "/webhook/batch",
            json!({"batch_id": "b", "transactions": []}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No transactions provided");

        let (status, _) = post_json(&router, "/webhook/batch", json!({"batch_id": "b"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_with_bad_payment_is_rejected_whole() {
        let router = create_router(Arc::new(StubReconciler::default()));
        let (status, body) = post_json(
            &router,
            "/webhook/batch",
            json!({"batch_id": "b", "transactions": [payment("p1", 1.0), {"payment_id": "p2"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required field: amount");
    }
}

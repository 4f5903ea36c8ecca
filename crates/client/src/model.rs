use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A caller-supplied financial record submitted for reconciliation.
///
/// Business semantics are not validated client-side; the record is forwarded
/// as-is. Timestamps are ISO-8601 strings and are sent verbatim, so the audit
/// hash sees exactly what the caller supplied. Top-level fields this struct
/// does not know about are kept in `extra` and serialized back flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    pub client_id: String,
    pub transaction_id: String,
    pub sequence_id: i64,
    pub event_timestamp: String,
    pub execution_timestamp: String,
    pub ledger_a_amount: f64,
    pub ledger_a_fx: f64,
    pub ledger_a_fee: f64,
    pub ledger_b_amount: f64,
    pub ledger_b_fx: f64,
    pub ledger_b_fee: f64,
    pub currency: String,
    pub vendor_name: String,
    pub counterparty_name: String,
    pub source_system_id: String,
    pub context_data: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            transaction_id: String::new(),
            sequence_id: 0,
            event_timestamp: String::new(),
            execution_timestamp: String::new(),
            ledger_a_amount: 0.0,
            ledger_a_fx: 1.0,
            ledger_a_fee: 0.0,
            ledger_b_amount: 0.0,
            ledger_b_fx: 1.0,
            ledger_b_fee: 0.0,
            currency: DEFAULT_CURRENCY.to_string(),
            vendor_name: String::new(),
            counterparty_name: String::new(),
            source_system_id: String::new(),
            context_data: Map::new(),
            extra: Map::new(),
        }
    }
}

/// Currency assumed when a record does not name one.
pub const DEFAULT_CURRENCY: &str = "USD";

impl Transaction {
    pub fn new(client_id: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            transaction_id: transaction_id.into(),
            ..Self::default()
        }
    }

    /// The record as a flat JSON object, the form the server receives and hashes.
    pub fn to_json_object(&self) -> Option<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server results
// ---------------------------------------------------------------------------

/// Decoded server result for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireResponse")]
pub struct ReconcileResponse {
    /// Hex SHA-256 over the transaction plus decision fields. Empty if the
    /// server omitted it.
    pub audit_hash: String,
    pub exception_flag: bool,
    pub reason_code: String,
    pub confidence: f64,
    /// `confidence` exactly as the server wrote it. `1` and `1.0` hash
    /// differently, so validation needs the original number.
    #[serde(skip_serializing)]
    pub confidence_raw: Option<Number>,
    pub explainability_features: Map<String, Value>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    audit_hash: String,
    exception_flag: bool,
    reason_code: String,
    confidence: Number,
    #[serde(default)]
    explainability_features: Map<String, Value>,
}

impl From<WireResponse> for ReconcileResponse {
    fn from(wire: WireResponse) -> Self {
        Self {
            audit_hash: wire.audit_hash,
            exception_flag: wire.exception_flag,
            reason_code: wire.reason_code,
            confidence: wire.confidence.as_f64().unwrap_or(0.0),
            confidence_raw: Some(wire.confidence),
            explainability_features: wire.explainability_features,
        }
    }
}

impl ReconcileResponse {
    /// The confidence as it enters the audit hash.
    ///
    /// The server's own number when it still agrees with `confidence`,
    /// otherwise `confidence` rendered as a float.
    pub fn confidence_value(&self) -> Value {
        match &self.confidence_raw {
            Some(n) if n.as_f64() == Some(self.confidence) => Value::Number(n.clone()),
            _ => Number::from_f64(self.confidence).map(Value::Number).unwrap_or(Value::Null),
        }
    }
}

/// Result for one transaction of a batch, tied back to its input by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_id: String,
    pub audit_hash: String,
    pub exception_flag: bool,
    pub reason_code: String,
    pub confidence: f64,
    #[serde(skip)]
    pub confidence_raw: Option<Number>,
    pub explainability_features: Map<String, Value>,
    /// RFC 3339 UTC time the batch request was sent.
    pub request_timestamp: String,
    /// RFC 3339 UTC time the batch response was received.
    pub response_timestamp: String,
}

impl TransactionResult {
    /// The decision fields in the shape the server returned them.
    pub fn response(&self) -> ReconcileResponse {
        ReconcileResponse {
            audit_hash: self.audit_hash.clone(),
            exception_flag: self.exception_flag,
            reason_code: self.reason_code.clone(),
            confidence: self.confidence,
            confidence_raw: self.confidence_raw.clone(),
            explainability_features: self.explainability_features.clone(),
        }
    }
}

/// Liveness payload from `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_loaded: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Batch + summary
// ---------------------------------------------------------------------------

/// Outcome of one successful batch submission.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_id: usize,
    pub transaction_count: usize,
    pub results: Vec<TransactionResult>,
    pub elapsed: Duration,
}

impl BatchResult {
    /// Transactions per second for this batch.
    pub fn throughput(&self) -> f64 {
        throughput(self.transaction_count, self.elapsed)
    }
}

/// A batch that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedBatch {
    pub batch_id: usize,
    pub transaction_count: usize,
    pub error: String,
}

/// Aggregate outcome of a full run.
#[derive(Debug, Clone)]
pub struct ProcessingSummary {
    pub total_transactions: usize,
    pub successful: usize,
    pub failed: usize,
    pub failed_batches: Vec<FailedBatch>,
    /// Transaction ids whose audit hash did not verify. Empty unless
    /// validation was requested.
    pub invalid_hashes: Vec<String>,
    pub elapsed: Duration,
    /// Results of successful batches, in input order.
    pub results: Vec<TransactionResult>,
}

impl ProcessingSummary {
    /// Transactions per second over the whole run.
    pub fn throughput(&self) -> f64 {
        throughput(self.total_transactions, self.elapsed)
    }

    pub fn exceptions(&self) -> usize {
        self.results.iter().filter(|r| r.exception_flag).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty()
    }
}

/// `count / elapsed`, or 0 when no measurable time elapsed.
pub fn throughput(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

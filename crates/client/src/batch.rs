//! Batch submission.
//!
//! Splits a transaction list into consecutive fixed-size windows, submits
//! them one at a time, and assembles a [`ProcessingSummary`]. A failing batch
//! is recorded and skipped; it never aborts the run.

use std::ops::Range;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::audit;
use crate::config::ClientConfig;
use crate::error::KoshaError;
use crate::model::{
    BatchResult, FailedBatch, ProcessingSummary, ReconcileResponse, Transaction, TransactionResult,
};
use crate::progress::ProgressObserver;
use crate::retry::RetryPolicy;

/// Hard ceiling on transactions per request; larger sizes are capped silently.
pub const MAX_BATCH_SIZE: usize = 5000;

pub const BATCH_PATH: &str = "/paid-api/v1/reconcile/batch";

/// Submits transactions to the batch endpoint in bounded chunks.
#[derive(Clone)]
pub struct BatchProcessor {
    http: reqwest::blocking::Client,
    api_url: String,
    api_key: Option<String>,
    batch_size: usize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl BatchProcessor {
    /// Build a processor that shares an existing HTTP session.
    pub fn new(http: reqwest::blocking::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            batch_size: effective_batch_size(config.batch_size),
            timeout: config.timeout(),
            retry: config.retry_policy(),
        }
    }

    /// Build a processor with its own HTTP session.
    pub fn from_config(config: &ClientConfig) -> Result<Self, KoshaError> {
        let http = crate::client::build_http(config.timeout())?;
        Ok(Self::new(http, config))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Submit one chunk in a single request.
    ///
    /// The response must carry exactly one result per input, in input order;
    /// anything else is rejected whole.
    pub fn submit_batch(
        &self,
        transactions: &[Transaction],
        batch_id: usize,
    ) -> Result<BatchResult, KoshaError> {
        let url = format!("{}{}", self.api_url, BATCH_PATH);
        let started = Instant::now();
        let request_timestamp = Utc::now().to_rfc3339();

        let resp = self
            .retry
            .execute(|| {
                let req = self.http.post(&url).timeout(self.timeout).json(transactions);
                match &self.api_key {
                    Some(key) => req.bearer_auth(key),
                    None => req,
                }
            })
            .map_err(|e| match e {
                KoshaError::Network(msg) => KoshaError::Network(format!("Batch {batch_id}: {msg}")),
                other => other,
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(KoshaError::Batch {
                batch_id,
                status,
                detail: error_detail(&body),
            });
        }

        let responses: Vec<ReconcileResponse> = resp
            .json()
            .map_err(|e| KoshaError::Parse(format!("Batch {batch_id}: {e}")))?;
        let response_timestamp = Utc::now().to_rfc3339();
        let elapsed = started.elapsed();

        if responses.len() != transactions.len() {
            return Err(KoshaError::Parse(format!(
                "Batch {}: expected {} results, got {}",
                batch_id,
                transactions.len(),
                responses.len(),
            )));
        }

        let results = transactions
            .iter()
            .zip(responses)
            .enumerate()
            .map(|(i, (txn, resp))| TransactionResult {
                transaction_id: result_id(txn, batch_id, i),
                audit_hash: resp.audit_hash,
                exception_flag: resp.exception_flag,
                reason_code: resp.reason_code,
                confidence: resp.confidence,
                confidence_raw: resp.confidence_raw,
                explainability_features: resp.explainability_features,
                request_timestamp: request_timestamp.clone(),
                response_timestamp: response_timestamp.clone(),
            })
            .collect();

        Ok(BatchResult {
            batch_id,
            transaction_count: transactions.len(),
            results,
            elapsed,
        })
    }

    /// Submit every transaction, batch by batch, in input order.
    ///
    /// Batch ids start at 1. The observer is notified after every batch,
    /// including failed ones.
    pub fn submit_all(
        &self,
        transactions: &[Transaction],
        validate_hashes: bool,
        observer: &dyn ProgressObserver,
    ) -> ProcessingSummary {
        let total = transactions.len();
        let started = Instant::now();
        let mut results = Vec::with_capacity(total);
        let mut failed_batches = Vec::new();
        let mut invalid_hashes = Vec::new();
        let mut processed = 0;

        log::info!(
            "submitting {} transactions in batches of {}",
            total,
            self.batch_size
        );

        for (index, range) in batch_ranges(total, self.batch_size).enumerate() {
            let batch_id = index + 1;
            let chunk = &transactions[range];

            match self.submit_batch(chunk, batch_id) {
                Ok(batch) => {
                    log::debug!(
                        "batch {}: {} transactions in {:.3}s ({:.1} txn/s)",
                        batch_id,
                        batch.transaction_count,
                        batch.elapsed.as_secs_f64(),
                        batch.throughput(),
                    );

                    if validate_hashes {
                        let invalid = invalid_results(chunk, &batch.results);
                        if !invalid.is_empty() {
                            log::warn!(
                                "batch {} has {} invalid audit hashes: {}",
                                batch_id,
                                invalid.len(),
                                invalid.join(", "),
                            );
                            invalid_hashes.extend(invalid);
                        }
                    }

                    results.extend(batch.results);
                }
                Err(e) => {
                    log::error!("error processing batch {}: {}", batch_id, e);
                    failed_batches.push(FailedBatch {
                        batch_id,
                        transaction_count: chunk.len(),
                        error: e.to_string(),
                    });
                }
            }

            processed += chunk.len();
            observer.on_progress(processed, total);
        }

        let successful = results.len();
        ProcessingSummary {
            total_transactions: total,
            successful,
            failed: total - successful,
            failed_batches,
            invalid_hashes,
            elapsed: started.elapsed(),
            results,
        }
    }
}

/// Requested size clamped to `1..=MAX_BATCH_SIZE`.
pub fn effective_batch_size(requested: usize) -> usize {
    requested.clamp(1, MAX_BATCH_SIZE)
}

/// Consecutive index windows covering `0..total`, each at most `batch_size` long.
pub fn batch_ranges(total: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let size = batch_size.max(1);
    (0..total).step_by(size).map(move |start| start..(start + size).min(total))
}

/// Ids of results whose audit hash does not verify against their input.
fn invalid_results(chunk: &[Transaction], results: &[TransactionResult]) -> Vec<String> {
    chunk
        .iter()
        .zip(results)
        .filter(|(txn, result)| !audit::validate(&result.response(), txn))
        .map(|(_, result)| result.transaction_id.clone())
        .collect()
}

fn result_id(txn: &Transaction, batch_id: usize, index: usize) -> String {
    if txn.transaction_id.is_empty() {
        format!("txn_{}_{}", batch_id, index)
    } else {
        txn.transaction_id.clone()
    }
}

/// Server-supplied `detail`, or a placeholder when the body has none.
pub(crate) fn error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "No response".to_string();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(json) => match json.get("detail") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "Unknown error".to_string(),
        },
        Err(_) => trimmed.chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_capped_and_floored() {
        assert_eq!(effective_batch_size(1000), 1000);
        assert_eq!(effective_batch_size(5000), 5000);
        assert_eq!(effective_batch_size(20_000), 5000);
        assert_eq!(effective_batch_size(0), 1);
    }

    #[test]
    fn from_config_applies_batch_size_bounds() {
        let mut config = ClientConfig::new("http://localhost:8000/");
        config.batch_size = 20_000;
        let processor = BatchProcessor::from_config(&config).unwrap();
        assert_eq!(processor.batch_size(), MAX_BATCH_SIZE);
        assert_eq!(processor.api_url, "http://localhost:8000");

        config.batch_size = 0;
        assert_eq!(BatchProcessor::from_config(&config).unwrap().batch_size(), 1);
    }

    #[test]
    fn ranges_for_2500_by_1000() {
        let ranges: Vec<_> = batch_ranges(2500, 1000).collect();
        assert_eq!(ranges, vec![0..1000, 1000..2000, 2000..2500]);
    }

    #[test]
    fn ranges_for_empty_and_exact() {
        assert_eq!(batch_ranges(0, 10).count(), 0);
        let ranges: Vec<_> = batch_ranges(20, 10).collect();
        assert_eq!(ranges, vec![0..10, 10..20]);
    }

    #[test]
    fn error_detail_variants() {
        assert_eq!(error_detail(""), "No response");
        assert_eq!(error_detail(r#"{"detail":"rate limited"}"#), "rate limited");
        assert_eq!(error_detail(r#"{"message":"nope"}"#), "Unknown error");
        assert_eq!(
            error_detail(r#"{"detail":[{"loc":["body"],"msg":"field required"}]}"#),
            r#"[{"loc":["body"],"msg":"field required"}]"#
        );
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn missing_ids_get_positional_fallback() {
        let mut txn = Transaction::default();
        assert_eq!(result_id(&txn, 3, 7), "txn_3_7");
        txn.transaction_id = "T-1".into();
        assert_eq!(result_id(&txn, 3, 7), "T-1");
    }
}

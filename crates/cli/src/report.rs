//! Reconciliation report and results export for `kosha reconcile`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use kosha_client::{FailedBatch, KoshaError, ProcessingSummary, TransactionResult};

/// Columns of the exported results CSV, in order.
pub const EXPORT_COLUMNS: [&str; 7] = [
    "transaction_id",
    "exception_flag",
    "reason_code",
    "confidence",
    "audit_hash",
    "request_timestamp",
    "response_timestamp",
];

/// Aggregate view of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub total_processed: usize,
    /// Results with no exception flagged.
    pub clean: usize,
    pub exceptions: usize,
    /// Percentage of processed results flagged as exceptions.
    pub exception_rate: f64,
    pub by_reason_code: BTreeMap<String, usize>,
    pub avg_confidence: f64,
    pub failed_transactions: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub invalid_hashes: Vec<String>,
    pub elapsed_secs: f64,
    /// Transactions per second over the whole run.
    pub throughput: f64,
}

impl ReconcileReport {
    pub fn from_summary(summary: &ProcessingSummary) -> Self {
        let results = &summary.results;
        let total = results.len();
        let exceptions = summary.exceptions();

        let mut by_reason_code = BTreeMap::new();
        for r in results {
            *by_reason_code.entry(r.reason_code.clone()).or_insert(0) += 1;
        }

        let avg_confidence = if total == 0 {
            0.0
        } else {
            results.iter().map(|r| r.confidence).sum::<f64>() / total as f64
        };
        let exception_rate = if total == 0 {
            0.0
        } else {
            exceptions as f64 / total as f64 * 100.0
        };

        Self {
            total_processed: total,
            clean: total - exceptions,
            exceptions,
            exception_rate,
            by_reason_code,
            avg_confidence,
            failed_transactions: summary.failed,
            failed_batches: summary.failed_batches.clone(),
            invalid_hashes: summary.invalid_hashes.clone(),
            elapsed_secs: summary.elapsed.as_secs_f64(),
            throughput: summary.throughput(),
        }
    }

    /// Human-readable summary for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "RECONCILIATION REPORT");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Total processed:  {}", self.total_processed);
        let _ = writeln!(out, "Clean:            {}", self.clean);
        let _ = writeln!(
            out,
            "Exceptions:       {} ({:.1}%)",
            self.exceptions, self.exception_rate
        );
        let _ = writeln!(out, "Avg confidence:   {:.2}%", self.avg_confidence * 100.0);
        let _ = writeln!(
            out,
            "Throughput:       {:.1} txn/s ({:.2}s)",
            self.throughput, self.elapsed_secs
        );

        if !self.by_reason_code.is_empty() {
            let _ = writeln!(out, "\nBy reason code:");
            for (code, count) in &self.by_reason_code {
                let pct = *count as f64 / self.total_processed as f64 * 100.0;
                let _ = writeln!(out, "   {code:<24} {count:>7} ({pct:.1}%)");
            }
        }

        if !self.failed_batches.is_empty() {
            let _ = writeln!(
                out,
                "\nFailed batches:   {} ({} transactions)",
                self.failed_batches.len(),
                self.failed_transactions
            );
            for batch in &self.failed_batches {
                let _ = writeln!(out, "   #{}: {}", batch.batch_id, batch.error);
            }
        }

        if !self.invalid_hashes.is_empty() {
            let _ = writeln!(out, "\nInvalid audit hashes: {}", self.invalid_hashes.len());
            for id in &self.invalid_hashes {
                let _ = writeln!(out, "   {id}");
            }
        }

        let _ = writeln!(out, "{rule}");
        out
    }
}

#[derive(Serialize)]
struct ExportRow<'a> {
    transaction_id: &'a str,
    exception_flag: bool,
    reason_code: &'a str,
    confidence: f64,
    audit_hash: &'a str,
    request_timestamp: &'a str,
    response_timestamp: &'a str,
}

impl<'a> From<&'a TransactionResult> for ExportRow<'a> {
    fn from(r: &'a TransactionResult) -> Self {
        Self {
            transaction_id: &r.transaction_id,
            exception_flag: r.exception_flag,
            reason_code: &r.reason_code,
            confidence: r.confidence,
            audit_hash: &r.audit_hash,
            request_timestamp: &r.request_timestamp,
            response_timestamp: &r.response_timestamp,
        }
    }
}

/// Write results as CSV. With `exceptions_only`, rows with no exception are
/// skipped. Returns the number of rows written.
pub fn write_results<W: Write>(
    writer: W,
    results: &[TransactionResult],
    exceptions_only: bool,
) -> Result<usize, csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(EXPORT_COLUMNS)?;

    let mut written = 0;
    for r in results.iter().filter(|r| !exceptions_only || r.exception_flag) {
        csv_writer.serialize(ExportRow::from(r))?;
        written += 1;
    }
    csv_writer.flush()?;
    Ok(written)
}

/// [`write_results`] into a file at `path`.
pub fn export_results(
    path: &Path,
    results: &[TransactionResult],
    exceptions_only: bool,
) -> Result<usize, KoshaError> {
    let file = std::fs::File::create(path)
        .map_err(|e| KoshaError::Io(format!("cannot create {}: {}", path.display(), e)))?;
    write_results(file, results, exceptions_only)
        .map_err(|e| KoshaError::Io(format!("cannot write {}: {}", path.display(), e)))
}

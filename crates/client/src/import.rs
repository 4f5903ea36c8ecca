//! CSV → [`Transaction`] loading.
//!
//! Header-driven: columns are matched by name, order does not matter, and
//! unknown columns are ignored. Absent or empty cells take defaults.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use chrono::Utc;
use serde_json::Map;

use crate::error::KoshaError;
use crate::model::{Transaction, DEFAULT_CURRENCY};

pub const DEFAULT_CLIENT_ID: &str = "UNKNOWN";
pub const DEFAULT_SOURCE_SYSTEM: &str = "CSV_IMPORT";

/// Load transactions from a CSV file, keeping at most `limit` rows.
pub fn load_transactions_from_csv(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<Transaction>, KoshaError> {
    let file = std::fs::File::open(path)
        .map_err(|e| KoshaError::Io(format!("cannot open {}: {}", path.display(), e)))?;
    let transactions = parse_transactions(file, limit)?;
    log::info!("loaded {} transactions from {}", transactions.len(), path.display());
    Ok(transactions)
}

/// Parse CSV from any reader. See module docs for column handling.
pub fn parse_transactions<R: Read>(
    reader: R,
    limit: Option<usize>,
) -> Result<Vec<Transaction>, KoshaError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let now = Utc::now().to_rfc3339();
    let mut out = Vec::new();

    for (i, record) in csv_reader.deserialize::<HashMap<String, String>>().enumerate() {
        if limit.is_some_and(|n| out.len() >= n) {
            break;
        }
        // Header is line 1.
        let line = i + 2;
        let row = record.map_err(|e| KoshaError::Parse(format!("line {line}: {e}")))?;
        out.push(row_to_transaction(&Row { cells: &row, line }, &now)?);
    }

    Ok(out)
}

struct Row<'a> {
    cells: &'a HashMap<String, String>,
    line: usize,
}

impl Row<'_> {
    fn text(&self, column: &str) -> Option<&str> {
        self.cells
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn text_or(&self, column: &str, default: &str) -> String {
        self.text(column).unwrap_or(default).to_string()
    }

    fn float_or(&self, column: &str, default: f64) -> Result<f64, KoshaError> {
        match self.text(column) {
            None => Ok(default),
            Some(v) => match v.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(f),
                Ok(_) => Err(KoshaError::InvalidInput(format!(
                    "line {}: column '{}': non-finite number '{}'",
                    self.line, column, v
                ))),
                Err(_) => Err(self.bad(column, v)),
            },
        }
    }

    fn int_or(&self, column: &str, default: i64) -> Result<i64, KoshaError> {
        match self.text(column) {
            None => Ok(default),
            // Spreadsheet exports often write integers as "7.0".
            Some(v) => v
                .parse::<i64>()
                .or_else(|_| match v.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 => Ok(f as i64),
                    _ => Err(()),
                })
                .map_err(|_| self.bad(column, v)),
        }
    }

    fn bad(&self, column: &str, value: &str) -> KoshaError {
        KoshaError::InvalidInput(format!(
            "line {}: column '{}': cannot parse number '{}'",
            self.line, column, value
        ))
    }
}

fn row_to_transaction(row: &Row<'_>, now: &str) -> Result<Transaction, KoshaError> {
    let timestamp = row.text_or("timestamp", now);
    let vendor_name = row.text_or("vendor_name", "");
    let counterparty_name = row.text_or("counterparty_name", &vendor_name);

    Ok(Transaction {
        client_id: row.text_or("client_id", DEFAULT_CLIENT_ID),
        transaction_id: row.text_or("transaction_id", ""),
        sequence_id: row.int_or("sequence_id", 0)?,
        event_timestamp: timestamp.clone(),
        execution_timestamp: timestamp,
        ledger_a_amount: row.float_or("ledger_a_amount", 0.0)?,
        ledger_a_fx: row.float_or("ledger_a_fx", 1.0)?,
        ledger_a_fee: row.float_or("ledger_a_fee", 0.0)?,
        ledger_b_amount: row.float_or("ledger_b_amount", 0.0)?,
        ledger_b_fx: row.float_or("ledger_b_fx", 1.0)?,
        ledger_b_fee: row.float_or("ledger_b_fee", 0.0)?,
        currency: row.text_or("currency", DEFAULT_CURRENCY),
        vendor_name,
        counterparty_name,
        source_system_id: row.text_or("source_system_id", DEFAULT_SOURCE_SYSTEM),
        context_data: Map::new(),
        extra: Map::new(),
    })
}

//! `kosha reconcile`: CSV in, reconciled results out.

use std::cell::Cell;
use std::io::Write;
use std::path::PathBuf;

use kosha_client::{KoshaClient, NoProgress, ProgressObserver};
use kosha_cli::report::{export_results, ReconcileReport};

use crate::exit_codes::{EXIT_API_UNREACHABLE, EXIT_BATCHES_FAILED, EXIT_HASH_MISMATCH};
use crate::CliError;

pub struct ReconcileArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub exceptions_output: Option<PathBuf>,
    pub limit: Option<usize>,
    pub validate_hashes: bool,
    pub json: bool,
    pub show_progress: bool,
}

/// Progress bar redrawn in place on stderr.
struct ProgressBar {
    width: usize,
    drawn: Cell<bool>,
}

impl ProgressBar {
    fn new() -> Self {
        Self { width: 40, drawn: Cell::new(false) }
    }

    fn render(&self, processed: usize, total: usize) -> String {
        let ratio = if total == 0 { 1.0 } else { processed as f64 / total as f64 };
        let filled = (((self.width as f64) * ratio) as usize).min(self.width);
        format!(
            "[{}{}] {}/{} ({:.1}%)",
            "█".repeat(filled),
            "░".repeat(self.width - filled),
            processed,
            total,
            ratio * 100.0
        )
    }

    fn finish(&self) {
        if self.drawn.get() {
            eprintln!();
        }
    }
}

impl ProgressObserver for ProgressBar {
    fn on_progress(&self, processed: usize, total: usize) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r   {}", self.render(processed, total));
        let _ = stderr.flush();
        self.drawn.set(true);
    }
}

pub fn cmd_reconcile(client: &KoshaClient, args: ReconcileArgs) -> Result<(), CliError> {
    let status = client.health_check().map_err(|e| CliError {
        code: EXIT_API_UNREACHABLE,
        message: format!("health check failed: {e}"),
        hint: Some(crate::api_hint(client)),
    })?;
    if !args.json {
        eprintln!("API status: {}", status.status);
    }

    let transactions = client
        .load_transactions_from_csv(&args.input, args.limit)
        .map_err(CliError::kosha)?;
    if !args.json {
        eprintln!("Loaded {} transactions from {}", transactions.len(), args.input.display());
    }

    let summary = if args.show_progress && !args.json {
        let bar = ProgressBar::new();
        let summary = client.reconcile_many(&transactions, args.validate_hashes, &bar);
        bar.finish();
        summary
    } else {
        client.reconcile_many(&transactions, args.validate_hashes, &NoProgress)
    };

    let report = ReconcileReport::from_summary(&summary);
    if args.json {
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::io(e.to_string()))?;
        println!("{text}");
    } else {
        print!("{}", report.render());
    }

    let written = export_results(&args.output, &summary.results, false)
        .map_err(CliError::kosha)?;
    if !args.json {
        eprintln!("Exported {} results to {}", written, args.output.display());
    }

    if let Some(path) = &args.exceptions_output {
        let written = export_results(path, &summary.results, true)
            .map_err(CliError::kosha)?;
        if !args.json {
            eprintln!("Exported {} exceptions to {}", written, path.display());
        }
    }

    if !summary.is_complete() {
        return Err(CliError {
            code: EXIT_BATCHES_FAILED,
            message: format!(
                "{} batch(es) failed ({} transactions not reconciled)",
                summary.failed_batches.len(),
                summary.failed
            ),
            hint: Some("re-run to retry; successful results were exported".into()),
        });
    }
    if !summary.invalid_hashes.is_empty() {
        return Err(CliError {
            code: EXIT_HASH_MISMATCH,
            message: format!("{} result(s) failed audit hash validation", summary.invalid_hashes.len()),
            hint: None,
        });
    }
    Ok(())
}

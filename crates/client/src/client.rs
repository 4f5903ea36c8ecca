//! Kosha HTTP client.
//!
//! Blocking reqwest client (no Tokio runtime required).
//! Covers the public contract: health probe, single reconcile, batch reconcile.

use std::path::Path;
use std::time::Duration;

use crate::batch::BatchProcessor;
use crate::config::ClientConfig;
use crate::error::KoshaError;
use crate::import;
use crate::model::{HealthStatus, ProcessingSummary, ReconcileResponse, Transaction};
use crate::progress::ProgressObserver;
use crate::retry::RetryPolicy;

pub const HEALTH_PATH: &str = "/health";
pub const RECONCILE_PATH: &str = "/paid-api/v1/reconcile";

/// Liveness probes use a short fixed timeout regardless of configuration.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const USER_AGENT: &str = concat!("kosha-client/", env!("CARGO_PKG_VERSION"));

/// Kosha API client (blocking).
#[derive(Clone)]
pub struct KoshaClient {
    http: reqwest::blocking::Client,
    config: ClientConfig,
    retry: RetryPolicy,
}

impl KoshaClient {
    pub fn new(config: ClientConfig) -> Result<Self, KoshaError> {
        let http = build_http(config.timeout())?;
        let retry = config.retry_policy();
        Ok(Self { http, config, retry })
    }

    /// Client configured from `KOSHA_*` environment variables.
    pub fn from_env() -> Result<Self, KoshaError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Replace the retry policy used for every request, batches included.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET /health`. Errors on connection failure or any non-2xx status.
    pub fn health_check(&self) -> Result<HealthStatus, KoshaError> {
        let url = self.url(HEALTH_PATH);
        let resp = self
            .retry
            .execute(|| self.authorize(self.http.get(&url).timeout(HEALTH_TIMEOUT)))?;
        let resp = check_status(resp)?;
        resp.json::<HealthStatus>()
            .map_err(|e| KoshaError::Parse(e.to_string()))
    }

    /// Reconcile a single transaction.
    pub fn reconcile_one(&self, transaction: &Transaction) -> Result<ReconcileResponse, KoshaError> {
        let url = self.url(RECONCILE_PATH);
        let resp = self.retry.execute(|| {
            self.authorize(self.http.post(&url).timeout(self.config.timeout()).json(transaction))
        })?;
        let resp = check_status(resp)?;
        resp.json::<ReconcileResponse>()
            .map_err(|e| KoshaError::Parse(e.to_string()))
    }

    /// Reconcile many transactions in batches of the configured size.
    ///
    /// Never fails as a whole: failed batches are listed in the summary.
    pub fn reconcile_many(
        &self,
        transactions: &[Transaction],
        validate_hashes: bool,
        observer: &dyn ProgressObserver,
    ) -> ProcessingSummary {
        self.batch_processor()
            .submit_all(transactions, validate_hashes, observer)
    }

    /// Batch processor sharing this client's session and configuration.
    pub fn batch_processor(&self) -> BatchProcessor {
        BatchProcessor::new(self.http.clone(), &self.config).with_retry_policy(self.retry.clone())
    }

    /// Load transactions from a CSV file, applying defaults for missing columns.
    pub fn load_transactions_from_csv(
        &self,
        path: &Path,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, KoshaError> {
        import::load_transactions_from_csv(path, limit)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    fn authorize(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

/// Shared HTTP session: user agent plus a default timeout.
pub(crate) fn build_http(timeout: Duration) -> Result<reqwest::blocking::Client, KoshaError> {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| KoshaError::Network(format!("failed to create HTTP client: {e}")))
}

fn check_status(
    resp: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, KoshaError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().unwrap_or_default();
    Err(KoshaError::Http {
        status,
        detail: crate::batch::error_detail(&body),
    })
}

//! Retry with exponential backoff.
//!
//! Every request the client makes goes through [`RetryPolicy::execute`]:
//! retryable statuses and transport errors are retried after
//! `base_delay * 2^attempt`, anything else is handed back after one attempt.

use std::thread;
use std::time::Duration;

use reqwest::blocking::{RequestBuilder, Response};

use crate::error::KoshaError;

/// Statuses retried by default: rate limiting and transient upstream failures.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    /// Policy that sends each request exactly once.
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Backoff before retry number `attempt + 1` (0-based): 1s, 2s, 4s, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Send the request built by `build_request`, retrying per policy.
    ///
    /// `build_request` is called once per attempt. Returns the first
    /// non-retryable response, or the last response once retries run out.
    /// Transport errors become [`KoshaError::Network`] after the last attempt.
    pub fn execute(
        &self,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response, KoshaError> {
        let mut attempt = 0u32;
        loop {
            let last = attempt >= self.max_retries;

            match build_request().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if last || !self.is_retryable(status) {
                        return Ok(resp);
                    }

                    let wait = retry_after(&resp, status).unwrap_or_else(|| self.delay_for(attempt));
                    log::warn!(
                        "retry {}/{} in {:.1}s (HTTP {})",
                        attempt + 1,
                        self.max_retries,
                        wait.as_secs_f64(),
                        status,
                    );
                    thread::sleep(wait);
                }
                Err(e) => {
                    if last {
                        return Err(KoshaError::Network(format!(
                            "{} (after {} attempts)",
                            e,
                            attempt + 1
                        )));
                    }

                    let wait = self.delay_for(attempt);
                    log::warn!(
                        "retry {}/{} in {:.1}s ({})",
                        attempt + 1,
                        self.max_retries,
                        wait.as_secs_f64(),
                        e,
                    );
                    thread::sleep(wait);
                }
            }
            attempt += 1;
        }
    }
}

/// `Retry-After` in whole seconds, honored for 429 and 503.
fn retry_after(resp: &Response, status: u16) -> Option<Duration> {
    if status != 429 && status != 503 {
        return None;
    }
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Instant;

    fn http() -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));

        let fast = RetryPolicy::new(3).with_base_delay(Duration::from_millis(10));
        assert_eq!(fast.delay_for(3), Duration::from_millis(80));
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(64) >= policy.delay_for(31));
    }

    #[test]
    fn default_statuses() {
        let policy = RetryPolicy::default();
        for status in [429, 500, 502, 503, 504] {
            assert!(policy.is_retryable(status), "{status} should be retryable");
        }
        for status in [200, 400, 401, 404, 422, 501] {
            assert!(!policy.is_retryable(status), "{status} should not be retryable");
        }
    }

    #[test]
    fn retryable_status_is_retried_until_ceiling() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/flaky");
            then.status(503).json_body(serde_json::json!({"detail": "busy"}));
        });

        let policy = RetryPolicy::new(2).with_base_delay(Duration::ZERO);
        let client = http();
        let url = server.url("/flaky");
        let resp = policy.execute(|| client.post(&url)).unwrap();

        assert_eq!(resp.status().as_u16(), 503);
        mock.assert_calls(3);
    }

    #[test]
    fn retry_after_overrides_backoff_on_429() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/limited");
            then.status(429)
                .header("retry-after", "0")
                .json_body(serde_json::json!({"detail": "rate limited"}));
        });

        // Backoff alone would sleep 30s + 60s.
        let policy = RetryPolicy::new(2).with_base_delay(Duration::from_secs(30));
        let client = http();
        let url = server.url("/limited");
        let started = Instant::now();
        let resp = policy.execute(|| client.post(&url)).unwrap();

        assert_eq!(resp.status().as_u16(), 429);
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
        mock.assert_calls(3);
    }

    #[test]
    fn retry_after_is_ignored_on_500() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/broken");
            then.status(500)
                .header("retry-after", "0")
                .json_body(serde_json::json!({"detail": "boom"}));
        });

        let policy = RetryPolicy::new(1).with_base_delay(Duration::from_millis(200));
        let client = http();
        let url = server.url("/broken");
        let started = Instant::now();
        let resp = policy.execute(|| client.post(&url)).unwrap();

        assert_eq!(resp.status().as_u16(), 500);
        assert!(started.elapsed() >= Duration::from_millis(200), "{:?}", started.elapsed());
        mock.assert_calls(2);
    }

    #[test]
    fn non_retryable_status_returns_after_one_attempt() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/bad");
            then.status(422).json_body(serde_json::json!({"detail": "bad payload"}));
        });

        let policy = RetryPolicy::new(3).with_base_delay(Duration::ZERO);
        let client = http();
        let url = server.url("/bad");
        let resp = policy.execute(|| client.post(&url)).unwrap();

        assert_eq!(resp.status().as_u16(), 422);
        mock.assert_calls(1);
    }

    #[test]
    fn connection_failure_becomes_network_error() {
        // Nothing listens on port 9 on a test box.
        let policy = RetryPolicy::new(1).with_base_delay(Duration::ZERO);
        let client = http();
        let err = policy
            .execute(|| client.get("http://127.0.0.1:9/health"))
            .unwrap_err();
        assert!(matches!(err, KoshaError::Network(_)), "got {err:?}");
        assert!(err.to_string().contains("after 2 attempts"), "got {err}");
    }
}

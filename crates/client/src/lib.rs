//! Kosha reconciliation API client.
//!
//! This crate is the single source of truth for the Kosha wire contract:
//! health probe, single-transaction reconcile, batch reconcile, and the
//! audit hash that binds each decision to its input.
//!
//! Blocking, sequential, no async runtime. Reconciliation itself happens
//! server-side; this crate only batches, retries, and verifies.

pub mod audit;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod import;
pub mod model;
pub mod progress;
pub mod retry;

pub use audit::{compute_hash, validate};
pub use batch::{BatchProcessor, MAX_BATCH_SIZE};
pub use client::KoshaClient;
pub use config::ClientConfig;
pub use error::KoshaError;
pub use model::{
    BatchResult, FailedBatch, HealthStatus, ProcessingSummary, ReconcileResponse, Transaction,
    TransactionResult,
};
pub use progress::{NoProgress, ProgressObserver};
pub use retry::RetryPolicy;

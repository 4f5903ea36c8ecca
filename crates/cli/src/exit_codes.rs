//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `kosha` exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain      | Description                              |
//! |---------|-------------|------------------------------------------|
//! | 0       | Universal   | Success                                  |
//! | 1       | Universal   | General error (unspecified)              |
//! | 2       | Universal   | CLI usage error (bad args, bad config)   |
//! | 3       | Universal   | File I/O error                           |
//! | 10-19   | api         | Kosha API and reconciliation outcomes    |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into [`kosha_exit_code`] or the relevant command

use kosha_client::KoshaError;

// =============================================================================
// Universal (0-3)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable or invalid config.
pub const EXIT_USAGE: u8 = 2;

/// File could not be read or written.
pub const EXIT_IO: u8 = 3;

// =============================================================================
// API (10-19)
// =============================================================================

/// Kosha API unreachable, unhealthy, or rejected a single request.
pub const EXIT_API_UNREACHABLE: u8 = 10;

/// Run completed but one or more batches failed.
/// Results for the successful batches are still written.
pub const EXIT_BATCHES_FAILED: u8 = 11;

/// Audit hash verification found at least one mismatch.
pub const EXIT_HASH_MISMATCH: u8 = 12;

/// Input data is malformed (bad CSV cell, non-object JSON, ...).
pub const EXIT_INVALID_INPUT: u8 = 13;

/// Map a client error to its exit code.
pub fn kosha_exit_code(err: &KoshaError) -> u8 {
    match err {
        KoshaError::Network(_) | KoshaError::Http { .. } | KoshaError::Batch { .. } => {
            EXIT_API_UNREACHABLE
        }
        KoshaError::Parse(_) | KoshaError::InvalidInput(_) => EXIT_INVALID_INPUT,
        KoshaError::Config(_) => EXIT_USAGE,
        KoshaError::Io(_) => EXIT_IO,
    }
}

//! Library surface of the `kosha` binary: report rendering, logging setup
//! and the webhook router.

pub mod logging;
pub mod report;
pub mod webhook;

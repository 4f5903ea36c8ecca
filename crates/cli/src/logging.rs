//! Structured logging for the `kosha` binary.
//!
//! Installs a `tracing` subscriber writing to stderr, so stdout stays free for
//! reports and `--json` output. Records emitted through the `log` facade by
//! `kosha-client` are bridged into the same subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a run: `--quiet` wins over `--verbose`.
pub fn default_level(verbose: bool, quiet: bool, base: &'static str) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        base
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` overrides `default_level` when set, e.g.
/// `RUST_LOG=kosha_client=debug,tower_http=info`. Calling this twice is a
/// no-op.
pub fn init_logging(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(default_level(true, true, "warn"), "error");
        assert_eq!(default_level(true, false, "warn"), "debug");
        assert_eq!(default_level(false, false, "info"), "info");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_logging("warn");
        init_logging("debug");
    }
}

// Kosha CLI - batch reconciliation, audit hashing and webhook server

mod exit_codes;
mod reconcile;
mod serve;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use kosha_cli::logging;
use kosha_client::config::{default_config_path, ENV_API_KEY, ENV_API_URL, ENV_BATCH_SIZE, ENV_MAX_RETRIES, ENV_TIMEOUT};
use kosha_client::{ClientConfig, KoshaClient, KoshaError};

use exit_codes::{
    kosha_exit_code, EXIT_API_UNREACHABLE, EXIT_HASH_MISMATCH, EXIT_INVALID_INPUT, EXIT_IO,
    EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "kosha")]
#[command(about = "Kosha reconciliation client: batch CSV runs, audit hashes, webhooks")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Kosha API base URL
    #[arg(long, global = true, env = ENV_API_URL)]
    api_url: Option<String>,

    /// API key, sent as a bearer token
    #[arg(long, global = true, env = ENV_API_KEY, hide_env_values = true)]
    api_key: Option<String>,

    /// Transactions per batch request (capped at 5000)
    #[arg(long, global = true, env = ENV_BATCH_SIZE)]
    batch_size: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = ENV_TIMEOUT)]
    timeout: Option<u64>,

    /// Retries for transient failures (429, 5xx, network)
    #[arg(long, global = true, env = ENV_MAX_RETRIES)]
    max_retries: Option<u32>,

    /// TOML config file (default: ~/.config/kosha/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Errors only
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the Kosha API is reachable and healthy
    #[command(after_help = "\
Examples:
  kosha health
  kosha health --json --api-url https://api.kosha.finance")]
    Health {
        /// Print the raw health payload as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reconcile transactions from a CSV file in batches
    #[command(after_help = "\
Examples:
  kosha reconcile transactions.csv
  kosha reconcile transactions.csv --output results.csv --exceptions-output review.csv
  kosha reconcile transactions.csv --validate-hashes --json --batch-size 2500")]
    Reconcile {
        /// Input CSV (header row required)
        input: PathBuf,

        /// Results CSV
        #[arg(long, short = 'o', default_value = "results.csv")]
        output: PathBuf,

        /// Also write rows flagged as exceptions to this file
        #[arg(long)]
        exceptions_output: Option<PathBuf>,

        /// Only process the first N rows
        #[arg(long)]
        limit: Option<usize>,

        /// Recompute and check every audit hash
        #[arg(long)]
        validate_hashes: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Do not draw the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Compute the audit hash of a JSON object
    #[command(after_help = "\
Examples:
  kosha hash payload.json
  kosha hash payload.json --verify 44099bb0f785581e22ae85e1921e5a21b9de069b03e3bc9cb1efae82a6131955
  kosha hash payload.json --canonical")]
    Hash {
        /// JSON file holding one object
        file: PathBuf,

        /// Expected hex digest; exit 12 on mismatch
        #[arg(long)]
        verify: Option<String>,

        /// Also print the canonical text that was hashed
        #[arg(long)]
        canonical: bool,
    },

    /// Run the webhook server
    #[command(after_help = "\
Examples:
  kosha serve
  kosha serve --bind 127.0.0.1:8080")]
    Serve {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:5000")]
        bind: SocketAddr,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nclient:  kosha-client ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let base_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    logging::init_logging(logging::default_level(cli.global.verbose, cli.global.quiet, base_level));

    let result = match cli.command {
        Commands::Health { json } => connect(&cli.global).and_then(|client| cmd_health(&client, json)),
        Commands::Reconcile {
            input,
            output,
            exceptions_output,
            limit,
            validate_hashes,
            json,
            no_progress,
        } => connect(&cli.global).and_then(|client| {
            reconcile::cmd_reconcile(
                &client,
                reconcile::ReconcileArgs {
                    input,
                    output,
                    exceptions_output,
                    limit,
                    validate_hashes,
                    json,
                    show_progress: !no_progress && !cli.global.quiet,
                },
            )
        }),
        // Offline: never touches the config file.
        Commands::Hash { file, verify, canonical } => cmd_hash(file, verify, canonical),
        Commands::Serve { bind } => connect(&cli.global).and_then(|client| serve::cmd_serve(client, bind)),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self { code: EXIT_INVALID_INPUT, message: msg.into(), hint: None }
    }

    /// Create error from a client error with the registry's exit code.
    pub fn kosha(err: KoshaError) -> Self {
        Self { code: kosha_exit_code(&err), message: err.to_string(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

pub(crate) fn api_hint(client: &KoshaClient) -> String {
    format!(
        "is the Kosha API reachable at {}? (set --api-url or {})",
        client.config().api_url,
        ENV_API_URL
    )
}

// ============================================================================
// config
// ============================================================================

fn connect(args: &GlobalArgs) -> Result<KoshaClient, CliError> {
    let config = resolve_config(args)?;
    KoshaClient::new(config).map_err(CliError::kosha)
}

/// Defaults, then the config file, then flags (clap folds `KOSHA_*` env vars
/// into the flags).
fn resolve_config(args: &GlobalArgs) -> Result<ClientConfig, CliError> {
    let file = match &args.config {
        Some(path) => Some(path.clone()),
        None => default_config_path().filter(|p| p.is_file()),
    };

    let mut config = match file {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            ClientConfig::load(&path).map_err(|e| {
                CliError { code: EXIT_USAGE, message: e.to_string(), hint: None }
                    .with_hint(format!("check {}", path.display()))
            })?
        }
        None => ClientConfig::default(),
    };

    if let Some(url) = &args.api_url {
        config.api_url = url.trim().trim_end_matches('/').to_string();
    }
    if let Some(key) = args.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        config.api_key = Some(key.to_string());
    }
    if let Some(n) = args.batch_size {
        config.batch_size = n;
    }
    if let Some(secs) = args.timeout {
        config.timeout_secs = secs;
    }
    if let Some(n) = args.max_retries {
        config.max_retries = n;
    }
    Ok(config)
}

// ============================================================================
// health
// ============================================================================

fn cmd_health(client: &KoshaClient, json: bool) -> Result<(), CliError> {
    let health = client.health_check().map_err(|e| CliError {
        code: EXIT_API_UNREACHABLE,
        message: format!("health check failed: {e}"),
        hint: Some(api_hint(client)),
    })?;

    if json {
        let text = serde_json::to_string_pretty(&health).map_err(|e| CliError::io(e.to_string()))?;
        println!("{text}");
    } else {
        println!("API status: {}", health.status);
        if let Some(loaded) = health.model_loaded {
            println!("Model loaded: {}", if loaded { "yes" } else { "no" });
        }
        println!("URL: {}", client.config().api_url);
    }
    Ok(())
}

// ============================================================================
// hash
// ============================================================================

fn cmd_hash(file: PathBuf, verify: Option<String>, canonical: bool) -> Result<(), CliError> {
    let text = std::fs::read_to_string(&file)
        .map_err(|e| CliError::io(format!("cannot read {}: {}", file.display(), e)))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| CliError::invalid_input(format!("{}: invalid JSON: {}", file.display(), e)))?;
    if !value.is_object() {
        return Err(CliError::invalid_input(format!(
            "{}: expected a JSON object",
            file.display()
        )));
    }

    let digest = kosha_client::compute_hash(&value);
    if canonical {
        println!("{}", kosha_client::audit::canonical_json(&value));
    }
    println!("{digest}");

    if let Some(expected) = verify {
        let expected = expected.trim().to_ascii_lowercase();
        if expected != digest {
            return Err(CliError {
                code: EXIT_HASH_MISMATCH,
                message: format!("hash mismatch: expected {expected}, computed {digest}"),
                hint: Some("the payload was modified after hashing".into()),
            });
        }
        eprintln!("verified");
    }
    Ok(())
}

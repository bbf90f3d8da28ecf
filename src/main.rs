//! # Vault Sync CLI (`sync`)
//!
//! One-shot pull and push runs, vault validation, store initialization and
//! the long-running watch agent.
//!
//! ## Usage
//!
//! ```bash
//! sync --config ./config/sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sync init` | Create the SQLite store and its schema |
//! | `sync validate` | Lint every vault document |
//! | `sync pull [--path=PATH...]` | Vault → store, for the whole vault or the given paths |
//! | `sync push` | Store → vault for records changed since the checkpoint |
//! | `sync watch` | Watch the vault, pull on change, serve `GET /health` |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `vault_sync=info`). Summaries go to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use vault_sync::{agent, config, migrate, pull, push, validate};

/// Vault Sync: keep a markdown complaint vault and the knowledge store in
/// step.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Every setting can also come from a `SYNC_*` environment variable.
#[derive(Parser)]
#[command(
    name = "sync",
    about = "Bidirectional sync between a markdown complaint vault and the knowledge store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sync.toml`. A missing file means defaults plus
    /// environment overrides.
    #[arg(long, global = true, default_value = "./config/sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store schema. Idempotent.
    Init,

    /// Validate every document in the vault.
    ///
    /// Exits non-zero when any document has a hard error.
    Validate,

    /// Pull vault edits into the store.
    ///
    /// Without paths the whole vault is scanned. Directories are expanded.
    /// Exits non-zero when any document failed.
    Pull {
        /// File or directory to pull instead of the whole vault. Repeatable.
        #[arg(long = "path", value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Same as `--path`, given positionally.
        #[arg(value_name = "PATHS")]
        positional: Vec<PathBuf>,
    },

    /// Push store changes into the vault.
    Push {
        /// Only records changed after this instant (ISO-8601 or YYYY-MM-DD).
        /// Overrides the stored checkpoint.
        #[arg(long)]
        since: Option<String>,

        /// Maximum number of records to push.
        #[arg(long)]
        limit: Option<usize>,

        /// Ignore the checkpoint and push every record.
        #[arg(long, conflicts_with = "since")]
        full: bool,
    },

    /// Run the watch agent and the health endpoint until SIGINT/SIGTERM.
    Watch,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vault_sync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let code = match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            ExitCode::SUCCESS
        }
        Commands::Validate => {
            if validate::run_validate(&cfg)? {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Pull { mut paths, positional } => {
            paths.extend(positional);
            let stats = pull::run_pull(&cfg, &paths).await?;
            if stats.errors == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Push { since, limit, full } => {
            let stats = push::run_push(&cfg, since.as_deref(), limit, full).await?;
            if stats.errors == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Watch => {
            agent::run_watch(&cfg).await?;
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

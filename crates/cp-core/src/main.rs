//! Cowrie Processor Core - honeypot log ingestion and enrichment.
//!
//! Thin CLI over the library crates:
//! - bulk/delta loaders with resumable checkpoints
//! - schema migration
//! - enrichment refresh and snapshot backfill
//! - sanitization sweeps and dead-letter replay
//!
//! Configuration files, report publication, and monitoring UIs belong
//! to wrapper tooling; this binary takes paths and flags and prints
//! one JSON payload per run on stdout.

mod commands;
mod exit_codes;
mod logging;

use clap::{Args, Parser, Subcommand};
use cp_common::StructuredError;
use cp_config::CoreConfig;
use exit_codes::ExitCode;
use logging::LogFormat;
use std::path::PathBuf;

/// Cowrie Processor Core - honeypot log ingestion and enrichment
#[derive(Parser)]
#[command(name = "cp-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Data directory (database, caches, status documents)
    #[arg(long, global = true, default_value = "data", env = "CP_DATA_DIR")]
    data_dir: PathBuf,

    /// Override the database file path
    #[arg(long, global = true, env = "CP_DATABASE")]
    database: Option<PathBuf>,

    /// Override the status document directory
    #[arg(long, global = true, env = "CP_STATUS_DIR")]
    status_dir: Option<PathBuf>,

    /// Offline geo/ASN database (TSV dump)
    #[arg(long, global = true, env = "CP_OFFLINE_DB")]
    offline_db: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, default_value = "human", env = "CP_LOG_FORMAT")]
    log_format: LogFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (warnings and errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Retain captured attacker passwords in cleartext (site policy)
    #[arg(long, global = true)]
    retain_password_text: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest files end-to-end from the beginning
    BulkIngest {
        /// Input files (line JSON; .gz/.bz2 transparently decompressed)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Accept pretty-printed JSON spanning multiple lines
        #[arg(long)]
        multiline_json: bool,
    },

    /// Ingest only bytes past each file's checkpoint
    DeltaIngest {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Accept pretty-printed JSON spanning multiple lines
        #[arg(long)]
        multiline_json: bool,
    },

    /// Apply outstanding schema migrations
    Migrate,

    /// Re-run the enrichment cascade over the IP inventory
    EnrichRefresh {
        /// Only rows whose enrichment is stale
        #[arg(long)]
        stale_only: bool,

        /// Maximum rows to process this run
        #[arg(long, default_value_t = 10_000)]
        limit: usize,
    },

    /// Sweep historical rows for forbidden Unicode
    Sanitize {
        /// Report what would change without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Rows per batch
        #[arg(long, default_value_t = 1_000)]
        batch_size: usize,
    },

    /// Seal snapshot columns for sessions with enriched IPs
    BackfillSnapshots,

    /// Attempt repair of dead-letter rows
    DeadLetterReplay,

    /// Verify database, schema version, and directory access
    CheckHealth,
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.global.log_format, cli.global.verbose, cli.global.quiet);

    let config = build_config(&cli.global);
    let violations = cp_config::validate(&config);
    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("config error: {violation}");
        }
        std::process::exit(ExitCode::UserError.as_i32());
    }

    let result = match cli.command {
        Commands::BulkIngest {
            files,
            multiline_json,
        } => {
            let mut config = config;
            config.ingest.multiline_json = multiline_json;
            commands::bulk_ingest(config, files)
        }
        Commands::DeltaIngest {
            files,
            multiline_json,
        } => {
            let mut config = config;
            config.ingest.multiline_json = multiline_json;
            commands::delta_ingest(config, files)
        }
        Commands::Migrate => commands::run_migrate(config),
        Commands::EnrichRefresh { stale_only, limit } => {
            commands::enrich_refresh(config, stale_only, limit)
        }
        Commands::Sanitize {
            dry_run,
            batch_size,
        } => commands::sanitize(config, dry_run, batch_size),
        Commands::BackfillSnapshots => commands::backfill_snapshots(config),
        Commands::DeadLetterReplay => commands::dead_letter_replay(config),
        Commands::CheckHealth => commands::check_health(config),
    };

    match result {
        Ok(code) => std::process::exit(code.as_i32()),
        Err(err) => {
            let structured = StructuredError::from(&err);
            eprintln!("{}", structured.to_json());
            eprintln!("error: {err}");
            eprintln!("fix: {}", err.remediation());
            std::process::exit(ExitCode::from(&err).as_i32());
        }
    }
}

fn build_config(opts: &GlobalOpts) -> CoreConfig {
    let mut config = CoreConfig::rooted_at(&opts.data_dir);
    if let Some(database) = &opts.database {
        config.database_path = database.clone();
    }
    if let Some(status_dir) = &opts.status_dir {
        config.status_dir = status_dir.clone();
    }
    config.enrich.offline_db_path = opts.offline_db.clone();
    config.policy.retain_password_text = opts.retain_password_text;
    config
}

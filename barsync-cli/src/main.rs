//! Barsync CLI: scheduled bar sync, store bootstrap, status, and polling.
//!
//! Commands:
//! - `sync`: one sync pass over the configured instruments
//! - `init`: create the database, schema and every instrument table
//! - `status`: report earliest and latest stored bar per instrument
//! - `poll`: snapshot the last day of bars for one symbol to CSV on an interval

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use barsync_core::data::IbClient;
use barsync_core::domain::Instrument;
use barsync_core::secrets::DbCredentials;
use barsync_core::store::{BarStore, PgStore};
use barsync_runner::{
    init_logging, LogConfig, PollSettings, Poller, SyncConfig, SyncEngine, SyncSettings,
};

#[derive(Parser)]
#[command(
    name = "barsync",
    about = "Barsync: incremental intraday bar sync into a time-series store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass: backfill or catch up every configured instrument.
    Sync {
        /// Path to a TOML config file. Defaults to ./barsync.toml if present.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only sync these symbols (e.g., --only AAPL MSFT).
        #[arg(long, num_args = 1..)]
        only: Vec<String>,
    },
    /// Create the database (if absent), the schema, and all instrument tables.
    Init {
        /// Path to a TOML config file. Defaults to ./barsync.toml if present.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show the stored range for each configured instrument.
    Status {
        /// Path to a TOML config file. Defaults to ./barsync.toml if present.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Poll the last day of bars for one symbol and write CSV snapshots.
    Poll {
        /// Symbol to poll (e.g., AAPL).
        #[arg(long)]
        symbol: String,

        #[arg(long, default_value = "SMART")]
        exchange: String,

        #[arg(long, default_value = "USD")]
        currency: String,

        /// Directory for CSV snapshots.
        #[arg(long, default_value = "data")]
        output_dir: PathBuf,

        /// Seconds between polls.
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,

        /// Stop after this many polls. Runs until the gateway is lost if omitted.
        #[arg(long)]
        iterations: Option<u64>,

        /// Path to a TOML config file (gateway and policy settings).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging(LogConfig::from_env())
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { config, only } => run_sync(config.as_deref(), &only),
        Commands::Init { config } => run_init(config.as_deref()),
        Commands::Status { config } => run_status(config.as_deref()),
        Commands::Poll {
            symbol,
            exchange,
            currency,
            output_dir,
            interval_secs,
            iterations,
            config,
        } => run_poll(
            Instrument::new(symbol, exchange, currency),
            output_dir,
            interval_secs,
            iterations,
            config.as_deref(),
        ),
    }
}

// ── Bootstrap ────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    SyncConfig::discover(path).context("failed to load configuration")
}

fn resolve_credentials(config: &SyncConfig) -> Result<DbCredentials> {
    let provider = config
        .secrets
        .provider()
        .context("failed to set up secret provider")?;
    provider
        .credentials()
        .with_context(|| format!("failed to resolve database credentials from {}", provider.name()))
}

fn open_store(config: &SyncConfig, creds: &DbCredentials) -> Result<PgStore> {
    let store = PgStore::connect(creds).context("failed to connect to the database")?;
    Ok(match &config.store.hypertable_chunk_interval {
        Some(interval) => store.with_hypertables(interval.clone()),
        None => store,
    })
}

fn connect_gateway(config: &SyncConfig) -> Result<IbClient> {
    IbClient::connect(config.gateway.address(), config.gateway.connect_policy())
        .context("failed to connect to the market-data gateway")
}

// ── Commands ─────────────────────────────────────────────────────────

fn run_sync(config_path: Option<&Path>, only: &[String]) -> Result<()> {
    let config = load_config(config_path)?;
    let instruments = config.select(only)?;
    let creds = resolve_credentials(&config)?;
    let mut store = open_store(&config, &creds)?;
    let mut client = connect_gateway(&config)?;

    let mut engine = SyncEngine::new(&mut client, &mut store, SyncSettings::from_config(&config));
    engine
        .prepare()
        .with_context(|| format!("failed to prepare schema '{}'", config.schema))?;

    let summary = engine.sync_all(&instruments, Utc::now());

    for outcome in &summary.outcomes {
        println!(
            "{:<24} {:<30} {:<11} fetched {:>7}  wrote {:>7}",
            outcome.instrument.to_string(),
            outcome.table,
            outcome.branch.to_string(),
            outcome.fetched,
            outcome.written
        );
    }

    if !summary.all_succeeded() {
        for (instrument, err) in &summary.errors {
            eprintln!("Error for {instrument}: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_init(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let creds = resolve_credentials(&config)?;

    let admin = creds.with_dbname(&config.store.admin_database);
    if PgStore::ensure_database(&admin, &creds.dbname)? {
        println!("Created database {}", creds.dbname);
    }

    let mut store = open_store(&config, &creds)?;
    store.ensure_schema(&config.schema)?;

    for instrument in &config.instruments {
        let table = config.table_for(instrument);
        let created = store.create_table_if_absent(&config.schema, &table)?;
        println!(
            "{:<30} {}",
            table,
            if created { "created" } else { "exists" }
        );
    }

    info!(schema = %config.schema, tables = config.instruments.len(), "store initialized");
    Ok(())
}

fn run_status(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let creds = resolve_credentials(&config)?;
    let mut store = open_store(&config, &creds)?;

    println!("{:<30} {:<27} {:<27}", "table", "earliest", "latest");
    for instrument in &config.instruments {
        let table = config.table_for(instrument);
        if !store.table_exists(&config.schema, &table)? {
            println!("{table:<30} (missing)");
            continue;
        }
        let cursor = store.cursor(&config.schema, &table)?;
        let show = |ts: Option<chrono::DateTime<Utc>>| {
            ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        };
        println!(
            "{:<30} {:<27} {:<27}",
            table,
            show(cursor.earliest),
            show(cursor.latest)
        );
    }
    Ok(())
}

fn run_poll(
    instrument: Instrument,
    output_dir: PathBuf,
    interval_secs: u64,
    iterations: Option<u64>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut client = connect_gateway(&config)?;

    let mut settings = PollSettings::new(instrument, output_dir);
    settings.interval = Duration::from_secs(interval_secs);
    settings.iterations = iterations;
    settings.granularity = config.granularity;
    settings.trades_only = config.policy.trades_only;
    settings.regular_hours_only = config.policy.regular_hours_only;

    let report = Poller::new(&mut client, settings).run()?;
    println!(
        "Polled {} times: {} snapshots, {} failures",
        report.polls, report.snapshots, report.failures
    );
    if let Some(path) = report.last_snapshot {
        println!("Last snapshot: {}", path.display());
    }
    Ok(())
}

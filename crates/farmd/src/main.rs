//! farmd — the render farm balancer daemon.
//!
//! Keeps every active job's machine limit in line with its priority,
//! license seats and remaining work.
//!
//! # Usage
//!
//! ```text
//! farmd --data-dir /var/lib/farmd import farm.json
//! farmd --data-dir /var/lib/farmd balance --dry-run
//! farmd --data-dir /var/lib/farmd --config farm.toml run --interval 30
//! ```

mod daemon;
mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use farm_balancer::{BalanceOptions, Balancer, EventHub, FarmEvent, StoreRepository};
use farm_core::FarmConfig;
use farm_state::{FarmStore, JobRecord};
use tracing::info;

#[derive(Parser)]
#[command(name = "farmd", about = "Render farm balancer daemon")]
struct Cli {
    /// Data directory holding the farm store.
    #[arg(long, global = true, default_value = "/var/lib/farmd")]
    data_dir: PathBuf,

    /// Path to farm.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the housekeeping loop until Ctrl-C.
    Run {
        /// Override the housekeeping interval, in seconds.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run a single balancing pass and print the result as JSON.
    Balance {
        /// Compute limits without writing them.
        #[arg(long)]
        dry_run: bool,
        /// Rewrite limits that already match.
        #[arg(long)]
        force: bool,
    },
    /// Store a job from a JSON file and fire the job-submitted event.
    Submit { file: PathBuf },
    /// Load jobs and workers from a JSON snapshot.
    Import { file: PathBuf },
    /// List stored jobs and their machine limits.
    Jobs,
}

/// Used when `RUST_LOG` is unset. Directives match by target prefix, so
/// `farm` covers every `farm_*` library crate.
const DEFAULT_LOG_FILTER: &str = "info,farmd=debug,farm=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = FarmConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Run { interval } => daemon::run(&cli.data_dir, config, interval).await,
        Command::Balance { dry_run, force } => {
            balance_once(&cli.data_dir, &config, BalanceOptions { dry_run, force })
        }
        Command::Submit { file } => submit(&cli.data_dir, &config, &file),
        Command::Import { file } => import(&cli.data_dir, &file),
        Command::Jobs => list_jobs(&cli.data_dir),
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<FarmStore> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join("farm.redb");
    let store = FarmStore::open(&path)?;
    info!(path = ?path, "farm store opened");
    Ok(store)
}

fn balancer_for(store: &FarmStore, config: &FarmConfig) -> Arc<Balancer> {
    let repo = Arc::new(StoreRepository::new(store.clone()));
    Arc::new(Balancer::new(repo, config.balancer.clone()))
}

fn balance_once(data_dir: &Path, config: &FarmConfig, options: BalanceOptions) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    let summary = balancer_for(&store, config).balance_with_options(options)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.failed.is_empty() {
        anyhow::bail!("{} machine limit writes failed", summary.failed.len());
    }
    Ok(())
}

fn submit(data_dir: &Path, config: &FarmConfig, file: &Path) -> anyhow::Result<()> {
    let job: JobRecord = serde_json::from_str(&std::fs::read_to_string(file)?)?;
    let store = open_store(data_dir)?;
    store.put_job(&job)?;

    let hub = EventHub::new();
    let _subscription = balancer_for(&store, config).attach(&hub);
    let report = hub.dispatch(&FarmEvent::JobSubmitted(job.id.clone()));
    if report.failed > 0 {
        anyhow::bail!("balancing after submit of {} failed", job.id);
    }

    print_jobs(&store)
}

fn import(data_dir: &Path, file: &Path) -> anyhow::Result<()> {
    let snapshot = snapshot::Snapshot::from_file(file)?;
    let store = open_store(data_dir)?;
    let (jobs, workers) = snapshot.apply(&store)?;
    info!(jobs, workers, "snapshot imported");
    Ok(())
}

fn list_jobs(data_dir: &Path) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    print_jobs(&store)
}

fn print_jobs(store: &FarmStore) -> anyhow::Result<()> {
    println!(
        "{:<24} {:<10} {:>9} {:>8} {:>6}",
        "JOB", "STATE", "PRIORITY", "PENDING", "LIMIT"
    );
    for job in store.list_jobs()? {
        println!(
            "{:<24} {:<10} {:>9} {:>8} {:>6}",
            job.id,
            job.state,
            job.priority,
            job.pending_work(),
            job.machine_limit
        );
    }
    Ok(())
}

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "evsync")]
#[command(about = "Sync events from the remote events API into the local store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run sweeps once and exit
    Sync(SyncArgs),
    /// Apply database migrations
    Migrate,
    /// Run sweeps on their cron schedules until Ctrl-C
    Schedule,
    /// List configured sweeps
    Sweeps,
}

#[derive(Debug, Args, Default)]
struct SyncArgs {
    /// Sweep to run; repeatable. Defaults to every enabled sweep.
    #[arg(long = "sweep")]
    sweeps: Vec<String>,
    /// Run every enabled sweep
    #[arg(long, conflicts_with = "sweeps")]
    all: bool,
    /// Reconcile into an in-memory store instead of the database
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => {
            let names = if args.all { Vec::new() } else { args.sweeps };
            let reports = evsync_sync::run_sweeps_once_from_env(&names, args.dry_run).await?;
            let mut failed = 0usize;
            for report in &reports {
                match &report.outcome {
                    Ok(summary) => println!(
                        "sweep {} complete: run_id={} fetched={} inserted={} updated={} invalid={} failed={}",
                        summary.sweep,
                        summary.run_id,
                        summary.fetched,
                        summary.inserted,
                        summary.updated,
                        summary.invalid,
                        summary.failed()
                    ),
                    Err(err) => {
                        failed += 1;
                        eprintln!("sweep {} aborted: {err}", report.sweep);
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} sweep(s) could not fetch events", reports.len());
            }
        }
        Commands::Migrate => {
            evsync_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            evsync_sync::run_scheduler_from_env().await?;
        }
        Commands::Sweeps => {
            let config = evsync_sync::SyncConfig::from_env();
            let registry = evsync_sync::SweepRegistry::load(&config.sweeps_file).await?;
            for sweep in &registry.sweeps {
                println!(
                    "{:<14} cron={:<18} per_page={} window_months={} force_insert={} max_pages={} enabled={}",
                    sweep.name,
                    sweep.cron,
                    sweep.per_page,
                    sweep
                        .window_months
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    sweep.force_insert,
                    sweep.max_pages,
                    sweep.enabled
                );
            }
        }
    }

    Ok(())
}

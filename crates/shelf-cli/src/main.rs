use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shelf_sync::{BatchReport, BatchScheduler, Services, SyncConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "shelfsync")]
#[command(about = "Retail location sync: POS and content data into Postgres and Redis")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve locations, run both batches once, then keep syncing on schedule.
    Run,
    /// Run one interval batch (inventory, enrichment, discounts, cache) and exit.
    Sync,
    /// Run one banner batch and exit.
    Content,
    /// Print the resolved locations as JSON.
    Locations,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var("SHELF_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
    });
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("loading configuration")?;
    info!(?config, "starting shelfsync");

    let services = Services::connect(&config).await?;
    let outcome = run_command(cli.command.unwrap_or(Commands::Run), &config, &services).await;
    services.close().await;
    if let Err(err) = &outcome {
        error!(error = format!("{err:#}"), "shelfsync exiting with error");
    }
    outcome
}

async fn run_command(command: Commands, config: &SyncConfig, services: &Services) -> Result<()> {
    let locations = services
        .pipeline
        .resolve_initial_locations()
        .await
        .context("resolving locations at startup")?;

    match command {
        Commands::Run => {
            let scheduler = BatchScheduler::new(
                services.pipeline.clone(),
                config.sync_interval(),
                config.daily_sync_hour,
            );
            scheduler.run_startup(&locations).await;
            let mut sched = scheduler.start().await?;
            shutdown_signal().await;
            info!("shutdown requested; stopping scheduler");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Sync => {
            print_report(&services.pipeline.run_interval_batch_for(locations).await)
        }
        Commands::Content => print_report(&services.pipeline.run_daily_batch_for(locations).await),
        Commands::Locations => {
            println!(
                "{}",
                serde_json::to_string_pretty(&locations).context("rendering locations")?
            );
        }
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    for phase in &report.phases {
        println!(
            "{:<15} synced={} skipped={} errored={} duration_ms={}",
            phase.entity.as_str(), phase.synced, phase.skipped, phase.errored, phase.duration_ms
        );
    }
    if let Some(cache) = &report.cache {
        println!(
            "{:<15} inventory={} discounts={} failed_locations={}",
            "cache", cache.total_inventory, cache.total_discounts, cache.failed_locations
        );
    }
    println!(
        "batch {} finished: locations={} errored={}",
        report.batch.run_id,
        report.locations,
        report.errored()
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

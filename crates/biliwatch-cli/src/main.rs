use std::sync::Arc;

use anyhow::{Context, Result};
use biliwatch_client::{WebDriverConfig, WebDriverRuntime};
use biliwatch_core::ZoneTable;
use biliwatch_store::SnapshotStore;
use biliwatch_sync::{
    AcquisitionService, CrawlConfig, CycleOutcome, Scheduler, SyncConfig,
};
use biliwatch_web::AppState;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "biliwatch")]
#[command(about = "Trending-video catalog tracker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler and the web API (default).
    Serve,
    /// Run one catalog cycle and exit.
    Crawl,
    /// Run one online-count cycle and exit.
    UpdateOnline,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let (service, store) = build_stack(&config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let scheduler = Arc::new(Scheduler::new(
                service.clone(),
                CrawlConfig {
                    max_videos: config.max_videos,
                    interval_minutes: config.interval_minutes,
                },
            ));
            // both jobs start due, so the first tick takes a snapshot right away
            scheduler.start().await;
            let state = AppState {
                store,
                scheduler: scheduler.clone(),
                service,
            };
            tokio::select! {
                result = biliwatch_web::serve(state, &config.listen_addr) => result?,
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
            }
            scheduler.shutdown().await;
        }
        Commands::Crawl => {
            let outcome = service.run_catalog_cycle(config.max_videos).await?;
            print_outcome("catalog", outcome);
            service.close().await;
        }
        Commands::UpdateOnline => {
            let outcome = service.run_online_cycle().await?;
            print_outcome("online-count", outcome);
            service.close().await;
        }
    }

    Ok(())
}

async fn build_stack(config: &SyncConfig) -> Result<(Arc<AcquisitionService>, Arc<SnapshotStore>)> {
    let zones = match &config.zone_table_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading zone table {}", path.display()))?;
            serde_json::from_str::<ZoneTable>(&text)
                .with_context(|| format!("parsing zone table {}", path.display()))?
        }
        None => ZoneTable::default(),
    };
    let store = Arc::new(
        SnapshotStore::connect(&config.database_url, zones)
            .await
            .context("opening snapshot database")?,
    );
    store.init().await.context("initializing snapshot schema")?;

    let runtime = Arc::new(
        WebDriverRuntime::new(WebDriverConfig {
            base_url: config.webdriver_url.clone(),
            headless: config.headless,
            ..WebDriverConfig::default()
        })
        .context("building webdriver runtime")?,
    );
    let service = Arc::new(AcquisitionService::new(runtime, store.clone(), config.clone()));
    Ok((service, store))
}

fn print_outcome(label: &str, outcome: CycleOutcome) {
    match outcome {
        CycleOutcome::Completed(report) => println!(
            "{label} cycle complete: processed={} updated={} failed={}",
            report.processed, report.updated, report.failed
        ),
        CycleOutcome::AlreadyRunning => println!("{label} cycle already running"),
    }
}

// src/main.rs
use anyhow::Context as _;
use bangumi_enricher::{
    config::{load_config, Config},
    utils::setup_logging,
    EnrichmentContext, RefreshOutcome,
};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bangumi-enricher", version, about = "Enrichment cache and refresh scheduler for a bangumi-data catalog")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Serve,
    /// Run one working-set refresh pass
    Refresh {
        /// Keep running until the retry queue drains
        #[arg(long)]
        wait_retries: bool,
    },
    /// Print the recent-seasons cache status, or one item's. Cache files are not modified
    Status {
        #[arg(long)]
        item: Option<String>,
    },
    /// Print one enriched item. Cache files are not modified
    Show { id: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config().context("Failed to load configuration")?;
    setup_logging(&config.log_level, config.log_path().as_deref())
        .context("Failed to initialize logging")?;
    config.validate_and_log();

    let read_only = matches!(cli.command, Command::Status { .. } | Command::Show { .. });
    let context = if read_only {
        EnrichmentContext::from_config_read_only(config.clone())
    } else {
        EnrichmentContext::from_config(config.clone())
    };
    let context = Arc::new(context.context("Failed to build enrichment context")?);

    let result = run(cli.command, &context, &config).await;

    if let Err(e) = context.shutdown().await {
        warn!("Shutdown finished with errors: {}", e);
    }
    result
}

async fn run(command: Command, context: &Arc<EnrichmentContext>, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Serve => {
            info!("🚀 Starting enrichment service on {}", config.catalog_path().display());
            context.init().await?;

            let mut stats_interval = tokio::time::interval(Duration::from_secs(600));
            stats_interval.tick().await;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("🛑 Ctrl-C received, shutting down...");
                        break;
                    }
                    _ = stats_interval.tick() => {
                        let failed = context.failed_items_status();
                        info!(
                            "📊 Cache stats: {:?}, failed items: {}, refreshing: {}",
                            context.cache_stats(),
                            failed.count,
                            context.is_refreshing_cache()
                        );
                    }
                }
            }
        }
        Command::Refresh { wait_retries } => {
            let outcome = context.refresh_working_set().await?;
            if let RefreshOutcome::AlreadyRunning = outcome {
                warn!("A refresh pass was already running");
            }
            print_json(&outcome)?;

            if wait_retries {
                let poll = Duration::from_secs(1);
                while context.failed_items_status().count > 0 {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            warn!("Interrupted while waiting for retries");
                            break;
                        }
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
            print_json(&context.failed_items_status())?;
        }
        Command::Status { item: Some(id) } => match context.item_cache_status(&id) {
            Some(status) => print_json(&status)?,
            None => {
                error!("Item {} not found in catalog", id);
                anyhow::bail!("item {} not found", id);
            }
        },
        Command::Status { item: None } => print_json(&context.recent_seasons_status())?,
        Command::Show { id } => match context.peek_item(&id) {
            Some(item) => print_json(&item)?,
            None => anyhow::bail!("item {} not found", id),
        },
    }
    Ok(())
}

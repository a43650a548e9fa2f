// src/main.rs
use anyhow::Context;
use clap::{Parser, Subcommand};
use finboard_core::{
    config::load_config,
    market::AssetType,
    news::RefreshOutcome,
    utils::{bootstrap_log_level, setup_logging},
    AppContext,
};
use log::{error, info, warn};
use std::sync::Arc;

/// Background services for the finance dashboard: news refresh, market quotes and
/// request admission.
#[derive(Parser, Debug)]
#[command(name = "finboard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the refresh schedule and maintenance tasks until Ctrl-C (default)
    Serve,
    /// Run one news refresh pass and print the resulting snapshot as JSON
    Refresh,
    /// Fetch a single quote through the cache and print it as JSON
    Quote {
        symbol: String,
        #[arg(long, default_value = "stock")]
        asset_type: AssetType,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();
    let log_level = bootstrap_log_level(|key| std::env::var(key).ok());
    setup_logging(&log_level).context("failed to initialize logging")?;
    let config = load_config().context("invalid configuration")?;
    info!("finboard starting ({} environment)", config.app_env);

    let ctx = Arc::new(AppContext::build(config).context("failed to build application context")?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&ctx).await?,
        Command::Refresh => {
            ctx.news.restore_or_warn().await;
            match ctx.news.force_now().await {
                RefreshOutcome::Published { items } => info!("Published {} news items", items),
                RefreshOutcome::Empty { .. } => warn!("No news items fetched; previous snapshot kept"),
            }
            let snapshot = ctx.news.snapshot_or_empty().await;
            println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
        }
        Command::Quote { symbol, asset_type } => {
            let quote = ctx.market.try_quote(&symbol, asset_type).await?;
            println!("{}", serde_json::to_string_pretty(&quote)?);
        }
    }
    Ok(())
}

async fn serve(ctx: &Arc<AppContext>) -> anyhow::Result<()> {
    ctx.start().await;
    info!(
        "Serving with {} news sources; market data {}",
        ctx.news.source_names().len(),
        if ctx.market.is_enabled() { "enabled" } else { "disabled" }
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");

    for stats in ctx.limiters.all_stats() {
        info!("{}", stats);
    }
    let cache = ctx.cache.stats();
    info!(
        "Cache: {} entries, hit rate {:.1}%",
        cache.entries,
        cache.hit_rate() * 100.0
    );
    ctx.shutdown();
    Ok(())
}

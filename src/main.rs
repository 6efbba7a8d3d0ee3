//! heat-engine binary entrypoint.
//! Loads config, installs tracing + metrics, and runs the scheduler until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use heat_engine::cache::MemoryCache;
use heat_engine::ingest::providers::rss::RssFeedProvider;
use heat_engine::keywords::FrequencyExtractor;
use heat_engine::metrics::Metrics;
use heat_engine::store::JsonFileStore;
use heat_engine::{HeatConfig, HeatEngine, HeatQuery, Scheduler};

/// Compact logs by default; `HEAT_LOG_FORMAT=json` for structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("HEAT_LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = HeatConfig::load()?;
    let metrics = Metrics::init(&cfg)?;

    if cfg.feeds.is_empty() {
        tracing::warn!("no [[feeds]] configured; runs will score nothing");
    }
    let provider = RssFeedProvider::from_feeds(cfg.feeds.clone(), cfg.fetch.per_source_timeout())?;
    let store = JsonFileStore::open(&cfg.store.path).context("opening heat store")?;
    let processor = FrequencyExtractor::from_config(&cfg.keywords);

    let engine = Arc::new(HeatEngine::new(
        Arc::new(provider),
        Arc::new(processor),
        Arc::new(MemoryCache::new()),
        Arc::new(store),
        cfg.clone(),
    ));

    let scheduler = Scheduler::new(engine.clone(), &cfg.scheduler);
    let ticker = scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    scheduler.shutdown().await;
    let _ = ticker.await;

    if let Some(last) = scheduler.last_run() {
        tracing::info!(run_id = %last.run_id, status = last.status.as_str(), "last run");
    }
    match engine.query(&HeatQuery::top(5)).await {
        Ok(top) => {
            for r in top {
                tracing::info!(news_id = %r.news_id, heat = r.heat_score, tier = ?r.tier, title = %r.title, "top item");
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not read top items"),
    }
    tracing::debug!(metrics = %metrics.render(), "final metrics");
    Ok(())
}

// tests/metrics.rs
mod common;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::{as_of, engine, item, source, ScriptedProvider};
use heat_engine::metrics::Metrics;
use heat_engine::store::MemoryStore;
use heat_engine::HeatConfig;

// Installs the global recorder, so this binary holds a single test.
#[tokio::test]
async fn run_metrics_are_exposed() {
    let metrics = Metrics::init(&HeatConfig::default()).unwrap();

    let provider = ScriptedProvider::new(vec![source("wire", "", 0.5), source("down", "", 0.5)])
        .with_items("wire", vec![item("wire", "1", "Harbour reopens after storm", as_of())])
        .failing("down");
    let eng = engine(Arc::new(provider), Arc::new(MemoryStore::new()));
    eng.run_at(as_of(), &CancellationToken::new()).await;

    let out = metrics.render();
    for needle in [
        "pipeline_runs_total",
        "pipeline_run_ms",
        "ingest_sources_ok_total",
        "ingest_sources_failed_total",
        "store_records_upserted_total",
        "fetch_concurrency",
    ] {
        assert!(out.contains(needle), "missing {needle} in:\n{out}");
    }
    assert!(out.contains(r#"status="partial""#));
}

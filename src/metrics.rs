use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::HeatConfig;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish static config gauges.
    pub fn init(cfg: &HeatConfig) -> Result<Self> {
        // Default buckets keep us clear of API differences across exporter versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;

        describe_all();
        gauge!("fetch_concurrency").set(cfg.fetch.concurrency as f64);
        gauge!("cluster_similarity_threshold").set(cfg.cluster.similarity_threshold);
        gauge!("scheduler_interval_secs").set(cfg.scheduler.interval_secs as f64);

        Ok(Self { handle })
    }

    /// Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn describe_all() {
    describe_counter!("pipeline_runs_total", "Pipeline runs by final status.");
    describe_histogram!("pipeline_run_ms", "Wall time of one pipeline run in milliseconds.");
    describe_counter!("keywords_degraded_total", "Items scored without keywords.");
    describe_counter!("cache_hits_total", "Cache-aside lookups served from the cache.");
    describe_counter!("cache_misses_total", "Cache-aside lookups that went to the loader.");
    describe_counter!("cache_degraded_total", "Cache operations that failed or timed out.");
    describe_counter!("store_records_upserted_total", "Heat records inserted or updated.");
    describe_counter!(
        "scheduler_triggers_rejected_total",
        "Triggers rejected because a run was in progress."
    );
    describe_gauge!("scheduler_running", "1 while a run is in progress.");
}

// tests/config_file.rs
use std::io::Write;

use heat_engine::config::{DecayShape, ENV_HEAT_CONFIG_PATH, ENV_STORE_PATH};
use heat_engine::HeatConfig;
use serial_test::serial;

const TOML: &str = r#"
[fetch]
concurrency = 8
per_source_timeout_secs = 4

[scoring.decay]
kind = "exponential"
cutoff_hours = 96

[scheduler]
interval_secs = 600
run_on_start = false

[store]
path = "var/heat.json"

[[feeds]]
source_id = "wire"
name = "Wire"
url = "https://wire.test/rss"
"#;

#[test]
#[serial]
fn load_from_file_then_env_overrides() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(TOML.as_bytes()).unwrap();

    std::env::set_var(ENV_HEAT_CONFIG_PATH, f.path());
    std::env::set_var(ENV_STORE_PATH, "/tmp/override.json");
    let cfg = HeatConfig::load();
    std::env::remove_var(ENV_HEAT_CONFIG_PATH);
    std::env::remove_var(ENV_STORE_PATH);
    let cfg = cfg.unwrap();

    assert_eq!(cfg.fetch.concurrency, 8);
    assert_eq!(cfg.fetch.per_source_timeout_secs, 4);
    // Untouched sections keep their defaults.
    assert_eq!(cfg.fetch.batch_timeout_secs, 15);
    assert_eq!(cfg.keywords.max_terms, 5);
    assert_eq!(cfg.scoring.decay, DecayShape::Exponential { cutoff_hours: 96.0 });
    assert_eq!(cfg.scheduler.interval_secs, 600);
    assert!(!cfg.scheduler.run_on_start);
    assert_eq!(cfg.store.path, std::path::PathBuf::from("/tmp/override.json"));
    // Feed weight and category default when omitted.
    assert_eq!(cfg.feeds[0].weight, 0.5);
    assert_eq!(cfg.feeds[0].category, "");
}

#[test]
#[serial]
fn missing_explicit_path_is_an_error() {
    std::env::set_var(ENV_HEAT_CONFIG_PATH, "/definitely/not/here/heat.toml");
    let res = HeatConfig::load();
    std::env::remove_var(ENV_HEAT_CONFIG_PATH);
    let err = res.unwrap_err();
    assert!(format!("{err:#}").contains("reading heat config"));
}

#[test]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heat.toml");
    std::fs::write(&path, "[fetch\nconcurrency = ").unwrap();
    assert!(HeatConfig::load_from(&path).is_err());
}

//! Config Validation Tests
//!
//! Exercise the configuration layer on its own: document validation,
//! typed getters over dotted keys, reload semantics of the store and the
//! file watcher's reload requests.

use std::io::Write;
use std::time::Duration;

use probe_relay::config::watcher::run_config_watcher;
use probe_relay::config::{ConfigError, ConfigSnapshot, ConfigStore, PipelineConfig};
use probe_relay::pipeline::WakeEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEVICE: &str = r#"
[device]
name = "field-unit-3"

[dispatcher]
periodic_check_secs = 30

[probes.pressure]
enabled = true
frequency = "normal"
threshold = 0.2

[probes.light]
enabled = "false"
frequency = 2

[[triggers]]
id = "night-buzz"
condition = { kind = "time", between = ["22:00", "06:00"], weekdays = ["Mon", "Tue"] }
actions = [{ action = "haptic_pattern", pattern = "buzz" }]

[[models]]
uri = "https://models.example.org/activity.json"
family = "tree"
"#;

// ============================================================================
// Document validation
// ============================================================================

#[test]
fn full_document_parses() {
    let config = PipelineConfig::from_toml_str(DEVICE).expect("valid document");
    assert_eq!(config.device.name, "field-unit-3");
    assert_eq!(config.dispatcher.periodic_check_secs, 30);
    assert_eq!(config.triggers.len(), 1);
    assert_eq!(config.models[0].family, "tree");
    assert!(config.models[0].enabled);
    assert!(!config.probes["light"].enabled);
}

#[test]
fn every_problem_is_reported_at_once() {
    let doc = r#"
        [dispatcher]
        periodic_check_secs = 0

        [probes.pressure]
        buffer_capacity = 0

        [[models]]
        uri = ""
    "#;
    match PipelineConfig::from_toml_str(doc) {
        Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3, "{errors:?}"),
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn malformed_window_is_a_parse_error() {
    let doc = r#"
        [[triggers]]
        id = "bad"
        condition = { kind = "time", between = ["25:99", "06:00"] }
    "#;
    assert!(matches!(
        PipelineConfig::from_toml_str(doc),
        Err(ConfigError::ParseInline(_))
    ));
}

// ============================================================================
// Typed getters
// ============================================================================

#[test]
fn getters_read_dotted_keys_with_defaults() {
    let snapshot = ConfigSnapshot::parse(DEVICE).expect("valid document");
    assert!(snapshot.get_bool("probes.pressure.enabled", false));
    assert!(!snapshot.get_bool("probes.light.enabled", true));
    assert!((snapshot.get_f64("probes.pressure.threshold", 0.5) - 0.2).abs() < 1e-12);
    assert!((snapshot.get_f64("probes.missing.threshold", 0.5) - 0.5).abs() < 1e-12);
    assert_eq!(snapshot.get_i64("probes.light.frequency", 0), 2);
    assert_eq!(snapshot.get_str("probes.pressure.frequency"), Some("normal"));
    assert_eq!(snapshot.get_str("device.name.nested"), None);
}

// ============================================================================
// Store reload semantics
// ============================================================================

fn write_file(path: &std::path::Path, contents: &str) {
    let mut file = std::fs::File::create(path).expect("create config file");
    file.write_all(contents.as_bytes()).expect("write config file");
}

#[test]
fn failed_reload_keeps_the_previous_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("probe_relay.toml");
    write_file(&path, DEVICE);

    let store = ConfigStore::open(&path).expect("opens");
    let before = store.snapshot();

    write_file(&path, "[dispatcher]\nperiodic_check_secs = \"soon\"\n");
    assert!(store.reload().is_err());
    let after = store.snapshot();
    assert_eq!(after.config().device.name, "field-unit-3");
    assert_eq!(after.generation(), before.generation());

    write_file(&path, "[device]\nname = \"renamed\"\n");
    let generation = store.reload().expect("reloads");
    assert_eq!(generation, before.generation() + 1);
    assert_eq!(store.snapshot().config().device.name, "renamed");
    // Readers holding the old Arc still see a consistent document
    assert_eq!(before.config().device.name, "field-unit-3");
}

#[test]
fn in_memory_store_cannot_reload() {
    let store = ConfigStore::new(ConfigSnapshot::default(), None);
    assert!(matches!(store.reload(), Err(ConfigError::NoSource)));
}

#[tokio::test]
async fn replace_notifies_subscribers_with_latest_generation() {
    let store = ConfigStore::new(ConfigSnapshot::default(), None);
    let mut changes = store.subscribe();

    store.replace(ConfigSnapshot::parse(DEVICE).expect("valid"));
    store.replace(ConfigSnapshot::default());

    changes.changed().await.expect("store alive");
    assert_eq!(*changes.borrow_and_update(), 2);
}

// ============================================================================
// Watcher
// ============================================================================

#[tokio::test]
async fn watcher_requests_reload_after_edit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("probe_relay.toml");
    write_file(&path, DEVICE);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(run_config_watcher(path.clone(), tx, cancel.clone()));

    // mtime granularity can be coarse; make sure the edit lands later
    tokio::time::sleep(Duration::from_millis(1100)).await;
    write_file(&path, "[device]\nname = \"edited\"\n");

    let event = tokio::time::timeout(Duration::from_secs(8), rx.recv())
        .await
        .expect("reload requested in time");
    assert_eq!(event, Some(WakeEvent::ReloadConfiguration));

    cancel.cancel();
    watcher.await.expect("watcher joins");
}

//! Model Cache Integration Tests
//!
//! A model fetched once keeps working after its source disappears: the
//! definition is cached under the MD5 of its URI and picked up by a fresh
//! registry, as after a restart without connectivity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use probe_relay::models::{
    model_key, HttpModelFetcher, ModelCache, ModelDefinition, ModelRegistry, ModelState,
};
use probe_relay::output::{ChannelOutput, OutputSink};
use probe_relay::types::{Record, Value};
use probe_relay::workers::WorkerPool;

const TREE: &str = r#"{"class": "Ambience", "accuracy": 0.8,
    "model": {"feature": "light.LIGHT", "threshold": 50.0,
              "left": {"leaf": "dim"}, "right": {"leaf": "bright"}}}"#;

fn registry(cache_dir: &std::path::Path, workers: &WorkerPool) -> ModelRegistry {
    ModelRegistry::new(
        Arc::new(HttpModelFetcher::new().expect("client")),
        ModelCache::new(cache_dir),
        workers.clone(),
    )
}

fn definition(uri: &str) -> ModelDefinition {
    ModelDefinition {
        uri: uri.to_string(),
        family: "tree".to_string(),
        enabled: true,
    }
}

#[tokio::test]
async fn cached_definition_survives_a_missing_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("ambience.json");
    std::fs::write(&source, TREE).expect("write definition");
    let uri = format!("file://{}", source.display());
    let cache_dir = dir.path().join("persisted_models");
    let workers = WorkerPool::new(2).expect("pool");

    let first = registry(&cache_dir, &workers);
    for load in first.apply(&[definition(&uri)]) {
        assert!(load.wait().await);
    }
    assert_eq!(first.usable(), 1);
    assert!(cache_dir.join(model_key(&uri)).exists());

    std::fs::remove_file(&source).expect("remove source");

    let second = registry(&cache_dir, &workers);
    for load in second.apply(&[definition(&uri)]) {
        assert!(load.wait().await);
    }
    let model = second.get(&uri).expect("model registered");
    assert!(model.is_usable());
    assert_eq!(model.state(), ModelState::Cached);
    assert_eq!(model.name(), Some("Ambience"));
}

#[tokio::test]
async fn burst_of_snapshots_yields_one_prediction() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("ambience.json");
    std::fs::write(&source, TREE).expect("write definition");
    let uri = format!("file://{}", source.display());
    let workers = WorkerPool::new(2).expect("pool");

    let models = registry(&dir.path().join("cache"), &workers);
    for load in models.apply(&[definition(&uri)]) {
        load.wait().await;
    }

    let (channel, mut rx) = ChannelOutput::new();
    let output: Arc<dyn OutputSink> = Arc::new(channel);
    let snapshot = Record::from([("light.LIGHT".to_string(), Value::Real(80.0))]);

    let start = Instant::now();
    let scheduled: usize = (0..5u64)
        .map(|i| models.predict_all(&snapshot, start + Duration::from_millis(i * 100), &output))
        .sum();
    assert_eq!(scheduled, 1);

    workers.wait_idle().await;
    let prediction = rx.recv().await.expect("prediction transmitted");
    assert_eq!(prediction.source, uri);
    assert_eq!(
        prediction.payload.get("PREDICTION").and_then(Value::as_str),
        Some("bright")
    );
    assert!(rx.try_recv().is_err());
}

//! Trained model lifecycle
//!
//! `Uninitialized -> Fetching -> {Cached, Failed}`. The compiled structure
//! is written once; a changed definition means building a new
//! [`TrainedModel`], never mutating this one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use super::{
    model_key, DecisionTree, LinearModel, ModelCache, ModelDefinition, ModelError, ModelFetcher,
    Prediction, PredictionThrottle, PredictionValue,
};
use crate::config::defaults::PREDICTION_THROTTLE;
use crate::output::OutputSink;
use crate::types::Record;
use crate::workers::{Completion, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Uninitialized,
    Fetching,
    /// A definition compiled and the model is usable
    Cached,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledModel {
    Linear(LinearModel),
    Tree(DecisionTree),
}

impl CompiledModel {
    pub fn compile(family: &str, model: &serde_json::Value) -> Result<Self, ModelError> {
        match family.trim().to_ascii_lowercase().as_str() {
            "linear" => LinearModel::compile(model).map(Self::Linear),
            "tree" => DecisionTree::compile(model).map(Self::Tree),
            other => Err(ModelError::UnknownFamily(other.to_string())),
        }
    }

    pub fn evaluate(&self, snapshot: &Record) -> Option<PredictionValue> {
        match self {
            Self::Linear(m) => m.evaluate(snapshot),
            Self::Tree(m) => m.evaluate(snapshot),
        }
    }
}

#[derive(Debug)]
struct Definition {
    name: String,
    accuracy: f64,
    model: CompiledModel,
}

fn parse_definition(family: &str, contents: &str) -> Result<Definition, ModelError> {
    let json: serde_json::Value = serde_json::from_str(contents)?;
    let name = json
        .get("class")
        .and_then(serde_json::Value::as_str)
        .ok_or(ModelError::MissingField("class"))?
        .to_string();
    let accuracy = json
        .get("accuracy")
        .and_then(serde_json::Value::as_f64)
        .ok_or(ModelError::MissingField("accuracy"))?;
    let model = json.get("model").ok_or(ModelError::MissingField("model"))?;
    Ok(Definition {
        name,
        accuracy,
        model: CompiledModel::compile(family, model)?,
    })
}

pub struct TrainedModel {
    uri: String,
    key: String,
    family: String,
    enabled: AtomicBool,
    state: Mutex<ModelState>,
    definition: OnceLock<Definition>,
    throttle: Mutex<PredictionThrottle>,
    evaluations: AtomicU64,
}

impl TrainedModel {
    pub fn new(definition: &ModelDefinition) -> Self {
        Self {
            uri: definition.uri.clone(),
            key: model_key(&definition.uri),
            family: definition.family.clone(),
            enabled: AtomicBool::new(definition.enabled),
            state: Mutex::new(ModelState::Uninitialized),
            definition: OnceLock::new(),
            throttle: Mutex::new(PredictionThrottle::new(PREDICTION_THROTTLE)),
            evaluations: AtomicU64::new(0),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Cache identity key (MD5 of the source URI).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Model name from the definition's `class` field, once compiled.
    pub fn name(&self) -> Option<&str> {
        self.definition.get().map(|d| d.name.as_str())
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.definition.get().map(|d| d.accuracy)
    }

    fn lock_state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_state(&self, state: ModelState) {
        *self.lock_state() = state;
    }

    pub fn state(&self) -> ModelState {
        *self.lock_state()
    }

    pub fn is_usable(&self) -> bool {
        self.definition.get().is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Administrative switch; does not touch the compiled structure.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Evaluations actually run (throttled calls excluded).
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Parse and compile a definition document, making the model usable.
    /// Fails if the document is invalid or a definition is already installed.
    pub fn install(&self, contents: &str) -> Result<(), ModelError> {
        let definition = parse_definition(&self.family, contents)?;
        let name = definition.name.clone();
        self.definition
            .set(definition)
            .map_err(|_| ModelError::Invalid(format!("{} is already compiled", self.uri)))?;
        self.set_state(ModelState::Cached);
        info!(model = %self.uri, name = %name, "Model ready");
        Ok(())
    }

    /// Read the cache, then fetch live. A fetched definition that compiles
    /// wins and refreshes the cache; otherwise the cached copy is used.
    pub async fn load(&self, fetcher: &dyn ModelFetcher, cache: &ModelCache) -> Result<(), ModelError> {
        self.set_state(ModelState::Fetching);

        let cached = cache.read(&self.key).await.unwrap_or_else(|e| {
            warn!(model = %self.uri, error = %e, "Model cache unreadable");
            None
        });

        match fetcher.fetch(&self.uri).await {
            Ok(fetched) => match self.install(&fetched) {
                Ok(()) => {
                    if let Err(e) = cache.write(&self.key, &fetched).await {
                        warn!(model = %self.uri, error = %e, "Failed to write model cache");
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(model = %self.uri, error = %e, "Fetched model definition rejected");
                }
            },
            Err(e) => {
                warn!(model = %self.uri, error = %e, "Model fetch failed");
            }
        }

        if let Some(contents) = cached {
            match self.install(&contents) {
                Ok(()) => {
                    info!(model = %self.uri, "Using cached model definition");
                    return Ok(());
                }
                Err(e) => warn!(model = %self.uri, error = %e, "Cached model definition rejected"),
            }
        }

        self.set_state(ModelState::Failed);
        Err(ModelError::NoDefinition(self.uri.clone()))
    }

    /// Run [`load`](Self::load) on the worker pool.
    pub fn start(
        self: &Arc<Self>,
        fetcher: Arc<dyn ModelFetcher>,
        cache: ModelCache,
        workers: &WorkerPool,
    ) -> Completion {
        let model = Arc::clone(self);
        workers.submit("model-load", async move {
            if let Err(e) = model.load(fetcher.as_ref(), &cache).await {
                warn!(model = %model.uri, error = %e, "Model unusable");
            }
        })
    }

    /// Evaluate synchronously, bypassing state checks and the throttle.
    pub fn evaluate(&self, snapshot: &Record) -> Option<PredictionValue> {
        self.definition.get()?.model.evaluate(snapshot)
    }

    /// Score `snapshot` in the background and transmit the prediction.
    ///
    /// Returns `None` when nothing was scheduled: the model is unusable,
    /// disabled, or the call fell inside the throttle window.
    pub fn predict(
        self: &Arc<Self>,
        snapshot: &Record,
        now: Instant,
        output: Arc<dyn OutputSink>,
        workers: &WorkerPool,
    ) -> Option<Completion> {
        if !self.is_usable() || !self.is_enabled() {
            return None;
        }

        let admitted = self
            .throttle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .admit(now);
        if !admitted {
            debug!(model = %self.uri, "Prediction throttled");
            return None;
        }

        let model = Arc::clone(self);
        let snapshot = snapshot.clone();
        Some(workers.submit("model-predict", async move {
            model.evaluations.fetch_add(1, Ordering::Relaxed);
            let Some(definition) = model.definition.get() else {
                return;
            };
            let Some(value) = definition.model.evaluate(&snapshot) else {
                debug!(model = %model.uri, "Model produced no prediction");
                return;
            };
            let prediction = Prediction {
                model_uri: model.uri.clone(),
                model_name: definition.name.clone(),
                value,
                accuracy: definition.accuracy,
                timestamp: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0),
            };
            output.transmit(&model.uri, prediction.to_record());
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FetchError;
    use crate::output::ChannelOutput;
    use crate::types::Value;
    use async_trait::async_trait;
    use std::time::Duration;

    const LINEAR: &str = r#"{
        "class": "Altitude band",
        "accuracy": 0.9,
        "model": { "intercept": 0.0, "coefficients": { "pressure.ALTITUDE": 0.5 } }
    }"#;

    fn definition(uri: &str) -> ModelDefinition {
        ModelDefinition {
            uri: uri.into(),
            family: "linear".into(),
            enabled: true,
        }
    }

    struct Canned(Result<String, ()>);

    #[async_trait]
    impl ModelFetcher for Canned {
        async fn fetch(&self, uri: &str) -> Result<String, FetchError> {
            self.0
                .clone()
                .map_err(|()| FetchError::UnsupportedScheme(uri.to_string()))
        }
    }

    fn snapshot() -> Record {
        Record::from([("pressure.ALTITUDE".to_string(), Value::Real(100.0))])
    }

    #[test]
    fn same_uri_shares_cache_key() {
        let a = TrainedModel::new(&definition("https://models.example.org/a.json"));
        let b = TrainedModel::new(&definition("https://models.example.org/a.json"));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn install_makes_model_usable_once() {
        let model = TrainedModel::new(&definition("file:///a.json"));
        assert_eq!(model.state(), ModelState::Uninitialized);
        assert!(model.evaluate(&snapshot()).is_none());

        model.install(LINEAR).expect("installs");
        assert_eq!(model.state(), ModelState::Cached);
        assert_eq!(model.name(), Some("Altitude band"));
        assert_eq!(model.evaluate(&snapshot()), Some(PredictionValue::Continuous(50.0)));
        assert!(model.install(LINEAR).is_err());
    }

    #[test]
    fn unknown_family_is_rejected() {
        let mut def = definition("file:///a.json");
        def.family = "neural".into();
        let model = TrainedModel::new(&def);
        assert!(matches!(model.install(LINEAR), Err(ModelError::UnknownFamily(_))));
        assert!(!model.is_usable());
    }

    #[tokio::test]
    async fn fetched_definition_refreshes_cache() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = ModelCache::new(dir.path());
        let model = TrainedModel::new(&definition("https://models.example.org/a.json"));
        cache.write(model.key(), "stale and broken").await.expect("seed cache");

        model
            .load(&Canned(Ok(LINEAR.to_string())), &cache)
            .await
            .expect("loads");
        assert!(model.is_usable());
        assert_eq!(cache.read(model.key()).await.expect("read").as_deref(), Some(LINEAR));
    }

    #[tokio::test]
    async fn falls_back_to_cache_when_fetch_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = ModelCache::new(dir.path());
        let model = TrainedModel::new(&definition("https://models.example.org/a.json"));
        cache.write(model.key(), LINEAR).await.expect("seed cache");

        model.load(&Canned(Err(())), &cache).await.expect("loads from cache");
        assert_eq!(model.state(), ModelState::Cached);
    }

    #[tokio::test]
    async fn falls_back_to_cache_when_fetched_payload_is_bad() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = ModelCache::new(dir.path());
        let model = TrainedModel::new(&definition("https://models.example.org/a.json"));
        cache.write(model.key(), LINEAR).await.expect("seed cache");

        model
            .load(&Canned(Ok("{\"class\": 1}".to_string())), &cache)
            .await
            .expect("loads from cache");
        assert!(model.is_usable());
    }

    #[tokio::test]
    async fn fails_without_any_definition() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = ModelCache::new(dir.path());
        let model = TrainedModel::new(&definition("https://models.example.org/a.json"));
        assert!(model.load(&Canned(Err(())), &cache).await.is_err());
        assert_eq!(model.state(), ModelState::Failed);
    }

    #[tokio::test]
    async fn predict_is_throttled_per_model() {
        let workers = WorkerPool::new(2).expect("pool");
        let (output, mut rx) = ChannelOutput::new();
        let output: Arc<dyn OutputSink> = Arc::new(output);
        let model = Arc::new(TrainedModel::new(&definition("file:///a.json")));
        model.install(LINEAR).expect("installs");

        let t0 = Instant::now();
        let first = model.predict(&snapshot(), t0, Arc::clone(&output), &workers);
        let second = model.predict(&snapshot(), t0 + Duration::from_millis(400), Arc::clone(&output), &workers);
        assert!(first.is_some());
        assert!(second.is_none());

        let third = model.predict(&snapshot(), t0 + Duration::from_millis(1400), Arc::clone(&output), &workers);
        assert!(third.expect("spaced call evaluates").wait().await);
        workers.wait_idle().await;
        assert_eq!(model.evaluations(), 2);

        let sent = rx.recv().await.expect("prediction transmitted");
        assert_eq!(sent.source, "file:///a.json");
        assert_eq!(sent.payload.get("PREDICTION"), Some(&Value::Real(50.0)));
    }

    #[tokio::test]
    async fn disabled_or_unusable_models_do_nothing() {
        let workers = WorkerPool::new(1).expect("pool");
        let output: Arc<dyn OutputSink> = Arc::new(ChannelOutput::new().0);
        let model = Arc::new(TrainedModel::new(&definition("file:///a.json")));
        assert!(model.predict(&snapshot(), Instant::now(), Arc::clone(&output), &workers).is_none());

        model.install(LINEAR).expect("installs");
        model.set_enabled(false);
        assert!(model.predict(&snapshot(), Instant::now(), output, &workers).is_none());
        assert_eq!(model.evaluations(), 0);
    }
}

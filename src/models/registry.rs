//! The set of configured models, keyed by source URI.
//!
//! Reconfiguration replaces whole model objects: unchanged entries keep
//! their compiled model (only the enable flag is refreshed), new or changed
//! entries get a fresh [`TrainedModel`], removed entries are dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::info;

use super::{ModelCache, ModelDefinition, ModelFetcher, TrainedModel};
use crate::output::OutputSink;
use crate::types::Record;
use crate::workers::{Completion, WorkerPool};

type ModelMap = BTreeMap<String, Arc<TrainedModel>>;

pub struct ModelRegistry {
    models: ArcSwap<ModelMap>,
    fetcher: Arc<dyn ModelFetcher>,
    cache: ModelCache,
    workers: WorkerPool,
}

impl ModelRegistry {
    pub fn new(fetcher: Arc<dyn ModelFetcher>, cache: ModelCache, workers: WorkerPool) -> Self {
        Self {
            models: ArcSwap::from_pointee(ModelMap::new()),
            fetcher,
            cache,
            workers,
        }
    }

    /// Bring the registry in line with `definitions`. Returns the
    /// completions of the loads started for new models.
    pub fn apply(&self, definitions: &[ModelDefinition]) -> Vec<Completion> {
        let current = self.models.load_full();
        let mut next = ModelMap::new();
        let mut loads = Vec::new();

        for definition in definitions {
            match current.get(&definition.uri) {
                Some(existing) if existing.family() == definition.family => {
                    existing.set_enabled(definition.enabled);
                    next.insert(definition.uri.clone(), Arc::clone(existing));
                }
                _ => {
                    let model = Arc::new(TrainedModel::new(definition));
                    loads.push(model.start(Arc::clone(&self.fetcher), self.cache.clone(), &self.workers));
                    next.insert(definition.uri.clone(), model);
                }
            }
        }

        let removed = current.keys().filter(|uri| !next.contains_key(*uri)).count();
        info!(
            models = next.len(),
            loading = loads.len(),
            removed,
            "Model registry updated"
        );
        self.models.store(Arc::new(next));
        loads
    }

    pub fn get(&self, uri: &str) -> Option<Arc<TrainedModel>> {
        self.models.load().get(uri).cloned()
    }

    pub fn len(&self) -> usize {
        self.models.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.load().is_empty()
    }

    pub fn usable(&self) -> usize {
        self.models.load().values().filter(|m| m.is_usable()).count()
    }

    /// Offer `snapshot` to every model. Returns how many scheduled an evaluation.
    pub fn predict_all(&self, snapshot: &Record, now: Instant, output: &Arc<dyn OutputSink>) -> usize {
        self.models
            .load()
            .values()
            .filter_map(|model| model.predict(snapshot, now, Arc::clone(output), &self.workers))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpModelFetcher;

    const DEF: &str = r#"{"class": "Tree", "accuracy": 0.7,
        "model": {"feature": "light.LIGHT", "threshold": 5.0, "left": {"leaf": "dark"}, "right": {"leaf": "bright"}}}"#;

    fn definition(uri: &str, enabled: bool) -> ModelDefinition {
        ModelDefinition {
            uri: uri.into(),
            family: "tree".into(),
            enabled,
        }
    }

    #[tokio::test]
    async fn apply_keeps_builds_and_drops() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("tree.json");
        std::fs::write(&file, DEF).expect("write definition");
        let uri = format!("file://{}", file.display());
        let missing = format!("file://{}", dir.path().join("missing.json").display());

        let workers = WorkerPool::new(2).expect("pool");
        let registry = ModelRegistry::new(
            Arc::new(HttpModelFetcher::new().expect("client")),
            ModelCache::new(dir.path().join("cache")),
            workers.clone(),
        );

        for load in registry.apply(&[definition(&uri, true), definition(&missing, true)]) {
            load.wait().await;
        }
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.usable(), 1);
        let first = registry.get(&uri).expect("model present");

        // Same URI: same object, new enable flag. Missing one is removed.
        let loads = registry.apply(&[definition(&uri, false)]);
        assert!(loads.is_empty());
        let kept = registry.get(&uri).expect("model kept");
        assert!(Arc::ptr_eq(&first, &kept));
        assert!(!kept.is_enabled());
        assert!(registry.get(&missing).is_none());
    }
}

//! Loaded-engine cache for model reuse.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::inference::{BackendLoader, InferenceEngine};
use crate::models::ModelSpec;
use crate::tensor::ChannelOrder;
use crate::codec::TensorCodec;
use crate::Result;

/// Cache of inference engines keyed by model id.
///
/// Loading a model is expensive; every call for the same model id shares one
/// engine. The least recently loaded entry is evicted once `max_size` is
/// reached.
pub struct ModelCache {
    loader: Arc<dyn BackendLoader>,
    engines: RwLock<CacheState>,
    max_size: usize,
    output_order: ChannelOrder,
}

#[derive(Default)]
struct CacheState {
    engines: HashMap<String, Arc<InferenceEngine>>,
    order: VecDeque<String>,
}

impl ModelCache {
    /// Create a new model cache.
    pub fn new(loader: Arc<dyn BackendLoader>, max_size: usize) -> Self {
        Self {
            loader,
            engines: RwLock::new(CacheState::default()),
            max_size: max_size.max(1),
            output_order: ChannelOrder::Rgb,
        }
    }

    /// Channel order decoded by engines created from now on.
    pub fn with_output_order(mut self, order: ChannelOrder) -> Self {
        self.output_order = order;
        self
    }

    /// Get or load the engine for `spec`.
    pub fn get_or_load(&self, spec: &ModelSpec) -> Result<Arc<InferenceEngine>> {
        {
            let state = self.engines.read();
            if let Some(engine) = state.engines.get(&spec.id) {
                if engine.spec() == spec {
                    tracing::debug!(model = %spec.id, "Model cache hit");
                    return Ok(Arc::clone(engine));
                }
            }
        }

        tracing::info!(model = %spec.id, weights = %spec.weights_path.display(), "Loading model");
        let backend = self.loader.load(spec)?;
        let codec = TensorCodec::new().with_output_order(self.output_order);
        let engine = Arc::new(InferenceEngine::new(spec.clone(), backend)?.with_codec(codec));

        let mut state = self.engines.write();
        if let Some(existing) = state.engines.get(&spec.id) {
            // Another caller loaded the same version first
            if existing.spec() == spec {
                return Ok(Arc::clone(existing));
            }
        }

        state.order.retain(|id| id != &spec.id);
        while state.order.len() >= self.max_size {
            if let Some(evicted) = state.order.pop_front() {
                tracing::debug!(model = %evicted, "Evicting cached model");
                state.engines.remove(&evicted);
            }
        }
        state.order.push_back(spec.id.clone());
        state.engines.insert(spec.id.clone(), Arc::clone(&engine));

        Ok(engine)
    }

    /// Drop every cached engine.
    pub fn clear(&self) {
        let mut state = self.engines.write();
        state.engines.clear();
        state.order.clear();
    }

    /// Number of cached engines.
    pub fn len(&self) -> usize {
        self.engines.read().engines.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::inference::{InferenceBackend, ResampleBackend};

    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl BackendLoader for CountingLoader {
        fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ResampleBackend::new(spec.scale)))
        }
    }

    fn loader() -> Arc<CountingLoader> {
        Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_reuses_engine() {
        let loader = loader();
        let cache = ModelCache::new(loader.clone(), 4);
        let spec = ModelSpec::new("x2", "x2", "x2.onnx", 2);

        let a = cache.get_or_load(&spec).unwrap();
        let b = cache.get_or_load(&spec).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reloads_changed_spec() {
        let loader = loader();
        let cache = ModelCache::new(loader.clone(), 4);
        let spec = ModelSpec::new("x2", "x2", "x2.onnx", 2);
        cache.get_or_load(&spec).unwrap();

        let updated = ModelSpec::new("x2", "x2", "x2-v2.onnx", 2);
        cache.get_or_load(&updated).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_oldest() {
        let loader = loader();
        let cache = ModelCache::new(loader.clone(), 2);
        for id in ["a", "b", "c"] {
            cache.get_or_load(&ModelSpec::new(id, id, "m.onnx", 1)).unwrap();
        }
        assert_eq!(cache.len(), 2);

        // "a" was evicted, so it loads again
        cache.get_or_load(&ModelSpec::new("a", "a", "m.onnx", 1)).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 4);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_spec_not_cached() {
        let cache = ModelCache::new(loader(), 2);
        assert!(cache.get_or_load(&ModelSpec::new("bad", "bad", "m.onnx", 0)).is_err());
        assert!(cache.is_empty());
    }
}

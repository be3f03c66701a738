//! Worker-side state: the models (segments) this worker has loaded.

use crate::client::CoordinatorClient;
use crate::executor::BlockCompute;
use protocol::{ModelConfig, WorkSegment};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One loaded model segment, ready to execute hops.
#[derive(Clone)]
pub struct LoadedModel {
    pub config: ModelConfig,
    pub segment: WorkSegment,
    pub compute: Arc<dyn BlockCompute>,
}

/// Axum application state shared across the worker's handlers.
#[derive(Clone)]
pub struct WorkerState {
    pub coordinator: Arc<CoordinatorClient>,
    models: Arc<RwLock<HashMap<String, LoadedModel>>>,
}

impl WorkerState {
    pub fn new(coordinator: Arc<CoordinatorClient>) -> Self {
        Self {
            coordinator,
            models: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert_model(&self, model_id: String, model: LoadedModel) {
        let mut models = self.models.write().expect("model map poisoned");
        models.insert(model_id, model);
    }

    pub fn model(&self, model_id: &str) -> Option<LoadedModel> {
        let models = self.models.read().expect("model map poisoned");
        models.get(model_id).cloned()
    }

    pub fn loaded_count(&self) -> usize {
        self.models.read().expect("model map poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockBlockCompute;
    use protocol::{SegmentKind, WorkerAddress};

    fn test_model() -> LoadedModel {
        let config = ModelConfig {
            decoder_layer_count: 2,
            hidden_size: 8,
            vocab_size: 256,
            end_of_text_token: 0,
            memory_sizes: None,
        };
        LoadedModel {
            compute: Arc::new(MockBlockCompute::new(
                config.hidden_size,
                config.vocab_size,
            )),
            segment: WorkSegment::new(WorkerAddress::new("http://w:9000"), SegmentKind::Full),
            config,
        }
    }

    #[test]
    fn insert_and_lookup() {
        let state = WorkerState::new(Arc::new(CoordinatorClient::new(
            "http://localhost:8080".into(),
        )));
        assert!(state.model("tiny").is_none());

        state.insert_model("tiny".into(), test_model());
        assert_eq!(state.loaded_count(), 1);
        assert!(state.model("tiny").is_some());
    }
}

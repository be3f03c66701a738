//! Shared application state and the model registry.
//!
//! Every registry the request handlers touch concurrently lives behind
//! its own lock inside [`AppState`]; handlers never hold a lock across an
//! await point. Model loading follows a two-map lifecycle: a model id is
//! first inserted into the pending map (guarded, at most once), fills up
//! with its pipeline, tokenizer and outstanding load tasks, and moves to
//! the active map when the last task completes.

use crate::catalog::ModelCatalog;
use crate::cost::CostModel;
use crate::dispatch::Dispatcher;
use crate::query::QueryRegistry;
use crate::registry::WorkerRegistry;
use crate::tokenizer::Tokenizer;
use protocol::{ModelConfig, WorkSegment};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{error, info};
use uuid::Uuid;

/// Axum application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<ModelCatalog>,
    pub workers: Arc<WorkerRegistry>,
    pub models: Arc<ModelRegistry>,
    pub queries: Arc<QueryRegistry>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub cost_model: Arc<dyn CostModel>,
}

impl AppState {
    pub fn new(
        catalog: ModelCatalog,
        dispatcher: Arc<dyn Dispatcher>,
        cost_model: Arc<dyn CostModel>,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            workers: Arc::new(WorkerRegistry::new()),
            models: Arc::new(ModelRegistry::new()),
            queries: Arc::new(QueryRegistry::new()),
            dispatcher,
            cost_model,
        }
    }
}

/// Where a model is in its loading lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    /// Never requested
    Absent,
    /// Planned; load tasks still outstanding
    Pending,
    /// All tasks acked; ready to serve queries
    Active,
}

/// A model still waiting on load tasks.
struct PendingModel {
    config: Option<ModelConfig>,
    pipeline: Vec<WorkSegment>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    pending_tasks: HashSet<Uuid>,
}

/// A fully loaded model.
#[derive(Clone)]
pub struct ActiveModel {
    pub config: ModelConfig,
    pub pipeline: Arc<Vec<WorkSegment>>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

#[derive(Default)]
struct ModelMaps {
    pending: HashMap<String, PendingModel>,
    active: HashMap<String, ActiveModel>,
}

/// Registry of pending and active models.
#[derive(Default)]
pub struct ModelRegistry {
    inner: RwLock<ModelMaps>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, model_id: &str) -> ModelStatus {
        let maps = self.inner.read().expect("model registry poisoned");
        if maps.active.contains_key(model_id) {
            ModelStatus::Active
        } else if maps.pending.contains_key(model_id) {
            ModelStatus::Pending
        } else {
            ModelStatus::Absent
        }
    }

    pub fn active(&self, model_id: &str) -> Option<ActiveModel> {
        let maps = self.inner.read().expect("model registry poisoned");
        maps.active.get(model_id).cloned()
    }

    /// Claim the right to load a model. Returns `false` if the model is
    /// already pending or active, in which case the caller must not plan
    /// again. This is the guard that collapses concurrent load requests
    /// into one.
    pub fn begin_load(&self, model_id: &str) -> bool {
        let mut maps = self.inner.write().expect("model registry poisoned");
        if maps.active.contains_key(model_id) || maps.pending.contains_key(model_id) {
            return false;
        }
        maps.pending.insert(
            model_id.to_string(),
            PendingModel {
                config: None,
                pipeline: Vec::new(),
                tokenizer: None,
                pending_tasks: HashSet::new(),
            },
        );
        true
    }

    /// Drop a pending entry after a failed plan, so a later request can
    /// try again once the pool has changed.
    pub fn abort_load(&self, model_id: &str) {
        let mut maps = self.inner.write().expect("model registry poisoned");
        maps.pending.remove(model_id);
    }

    /// Store the planned pipeline and the full set of outstanding task
    /// ids. Must happen before any load instruction is dispatched, so no
    /// ack can arrive for an unregistered task.
    pub fn install_plan(
        &self,
        model_id: &str,
        config: ModelConfig,
        pipeline: Vec<WorkSegment>,
        task_ids: Vec<Uuid>,
    ) {
        let mut maps = self.inner.write().expect("model registry poisoned");
        if let Some(pending) = maps.pending.get_mut(model_id) {
            pending.config = Some(config);
            pending.pipeline = pipeline;
            pending.pending_tasks.extend(task_ids);
        }
    }

    pub fn set_tokenizer(&self, model_id: &str, tokenizer: Arc<dyn Tokenizer>) {
        let mut maps = self.inner.write().expect("model registry poisoned");
        if let Some(pending) = maps.pending.get_mut(model_id) {
            pending.tokenizer = Some(tokenizer);
        }
    }

    /// Complete one load task. Returns `None` if the model or task id is
    /// unknown; `Some(true)` when this completion activated the model.
    pub fn complete_task(&self, model_id: &str, task_id: Uuid) -> Option<bool> {
        let mut maps = self.inner.write().expect("model registry poisoned");
        let pending = maps.pending.get_mut(model_id)?;
        if !pending.pending_tasks.remove(&task_id) {
            return None;
        }
        if !pending.pending_tasks.is_empty() {
            return Some(false);
        }

        // Last task done: activate.
        let pending = maps
            .pending
            .remove(model_id)
            .expect("pending entry checked above");
        let (Some(config), Some(tokenizer)) = (pending.config, pending.tokenizer) else {
            error!(model_id, "Model completed its tasks without a plan or tokenizer");
            return Some(false);
        };
        maps.active.insert(
            model_id.to_string(),
            ActiveModel {
                config,
                pipeline: Arc::new(pending.pipeline),
                tokenizer,
            },
        );
        info!(model_id, "Model is ready");
        Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharTokenizer;
    use protocol::{SegmentKind, WorkerAddress};

    fn config() -> ModelConfig {
        ModelConfig {
            decoder_layer_count: 2,
            hidden_size: 8,
            vocab_size: 100,
            end_of_text_token: 0,
            memory_sizes: None,
        }
    }

    fn pipeline() -> Vec<WorkSegment> {
        vec![WorkSegment::new(
            WorkerAddress::new("http://a:9000"),
            SegmentKind::Full,
        )]
    }

    #[test]
    fn begin_load_is_exclusive() {
        let registry = ModelRegistry::new();
        assert!(registry.begin_load("m"));
        assert!(!registry.begin_load("m"));
        assert_eq!(registry.status("m"), ModelStatus::Pending);
    }

    #[test]
    fn abort_allows_retry() {
        let registry = ModelRegistry::new();
        assert!(registry.begin_load("m"));
        registry.abort_load("m");
        assert_eq!(registry.status("m"), ModelStatus::Absent);
        assert!(registry.begin_load("m"));
    }

    #[test]
    fn model_activates_when_tasks_drain() {
        let registry = ModelRegistry::new();
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());

        registry.begin_load("m");
        registry.install_plan("m", config(), pipeline(), vec![t1, t2]);
        registry.set_tokenizer("m", Arc::new(CharTokenizer::new(0)));

        assert_eq!(registry.complete_task("m", t1), Some(false));
        assert_eq!(registry.status("m"), ModelStatus::Pending);

        assert_eq!(registry.complete_task("m", t2), Some(true));
        assert_eq!(registry.status("m"), ModelStatus::Active);
        assert!(registry.active("m").is_some());
    }

    #[test]
    fn unknown_task_is_reported() {
        let registry = ModelRegistry::new();
        registry.begin_load("m");
        registry.install_plan("m", config(), pipeline(), vec![Uuid::new_v4()]);

        assert_eq!(registry.complete_task("m", Uuid::new_v4()), None);
        assert_eq!(registry.complete_task("other", Uuid::new_v4()), None);
    }

    #[test]
    fn completing_the_same_task_twice_is_unknown() {
        let registry = ModelRegistry::new();
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());
        registry.begin_load("m");
        registry.install_plan("m", config(), pipeline(), vec![t1, t2]);

        assert_eq!(registry.complete_task("m", t1), Some(false));
        assert_eq!(registry.complete_task("m", t1), None);
    }
}

//! Model catalog.
//!
//! The catalog of available models lives in `<models_root>/models.json`
//! and each model's configuration in `<models_root>/<model_id>/model.json`.
//! The catalog is read lazily on the first client join and cached for the
//! lifetime of the process.

use crate::error::{CoordinatorError, Result};
use protocol::{ModelCatalogFile, ModelConfig};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

pub struct ModelCatalog {
    models_root: PathBuf,
    cache: RwLock<Option<ModelCatalogFile>>,
}

impl ModelCatalog {
    pub fn new(models_root: impl Into<PathBuf>) -> Self {
        Self {
            models_root: models_root.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn models_root(&self) -> &Path {
        &self.models_root
    }

    /// The catalog map, read from disk on first use.
    pub fn models(&self) -> Result<ModelCatalogFile> {
        {
            let cache = self.cache.read().expect("catalog cache poisoned");
            if let Some(models) = cache.as_ref() {
                return Ok(models.clone());
            }
        }

        let path = self.models_root.join("models.json");
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            CoordinatorError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let models: ModelCatalogFile = serde_json::from_str(&raw).map_err(|e| {
            CoordinatorError::Config(format!("cannot parse {}: {e}", path.display()))
        })?;

        info!(count = models.len(), path = %path.display(), "Loaded model catalog");

        let mut cache = self.cache.write().expect("catalog cache poisoned");
        // A concurrent first read may have beaten us here; either copy is
        // the same file, so last write wins.
        *cache = Some(models.clone());
        Ok(models)
    }

    /// Read one model's `model.json`.
    pub fn model_config(&self, model_id: &str) -> Result<ModelConfig> {
        let path = self.models_root.join(model_id).join("model.json");
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            CoordinatorError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            CoordinatorError::Config(format!("cannot parse {}: {e}", path.display()))
        })
    }
}

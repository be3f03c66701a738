//! Model catalog and configuration types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry in the model catalog served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Human-readable model name
    pub name: String,

    /// Approximate parameter-file size, e.g. "124M" (display only)
    #[serde(default)]
    pub size: Option<String>,

    /// Disabled models are listed but cannot be opened
    #[serde(default)]
    pub disabled: bool,
}

/// The catalog file: model id -> descriptor, ordered for display.
pub type ModelCatalogFile = BTreeMap<String, ModelDescriptor>;

/// The two decoder sub-layer kinds a transformer layer is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Attention,
    FeedForward,
}

/// Per-block memory requirements, as configured in a model's `model.json`.
///
/// Values are in MiB; the planner converts to bytes. When absent, the
/// coordinator falls back to a calculated estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySizes {
    pub head_mib: u64,
    pub attention_mib: u64,
    pub feed_forward_mib: u64,
}

impl MemorySizes {
    const MIB: u64 = 1024 * 1024;

    pub fn head_bytes(&self) -> u64 {
        self.head_mib * Self::MIB
    }

    pub fn attention_bytes(&self) -> u64 {
        self.attention_mib * Self::MIB
    }

    pub fn feed_forward_bytes(&self) -> u64 {
        self.feed_forward_mib * Self::MIB
    }
}

/// Per-model configuration, read from `<models_root>/<model_id>/model.json`
/// and shipped to every worker inside a `LoadModel` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of decoder layers
    pub decoder_layer_count: usize,

    /// Hidden state width
    pub hidden_size: usize,

    /// Vocabulary size
    pub vocab_size: u32,

    /// Token id that terminates generation
    pub end_of_text_token: u32,

    /// Configured memory requirements; `None` means "estimate them"
    #[serde(default)]
    pub memory_sizes: Option<MemorySizes>,
}

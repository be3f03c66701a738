//! Block cost estimation.
//!
//! A model's `model.json` may configure its memory requirements directly;
//! when it does not, the coordinator falls back to a calculation-only
//! estimate derived from the model dimensions. The parameter store that
//! would measure real tensor sizes is an external collaborator behind the
//! [`CostModel`] trait.

use crate::planner::BlockCosts;
use protocol::ModelConfig;

/// Supplies the per-block byte costs the planner partitions against.
pub trait CostModel: Send + Sync {
    fn estimate(&self, config: &ModelConfig) -> BlockCosts;
}

/// Estimates costs from the model dimensions alone, assuming f32 weights.
///
/// Head: token embedding plus tied output projection. Attention: Q/K/V and
/// output projections. Feed-forward: the usual 4x expansion, two matrices.
#[derive(Debug, Default)]
pub struct DimensionCostModel;

const F32_BYTES: u64 = 4;

impl CostModel for DimensionCostModel {
    fn estimate(&self, config: &ModelConfig) -> BlockCosts {
        let hidden = config.hidden_size as u64;
        let vocab = config.vocab_size as u64;

        BlockCosts {
            head_bytes: vocab * hidden * F32_BYTES,
            attention_bytes: 4 * hidden * hidden * F32_BYTES,
            feed_forward_bytes: 8 * hidden * hidden * F32_BYTES,
        }
    }
}

/// Costs for a model, honoring configured sizes before estimating.
pub fn costs_for(config: &ModelConfig, model: &dyn CostModel) -> BlockCosts {
    match &config.memory_sizes {
        Some(sizes) => BlockCosts {
            head_bytes: sizes.head_bytes(),
            attention_bytes: sizes.attention_bytes(),
            feed_forward_bytes: sizes.feed_forward_bytes(),
        },
        None => model.estimate(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::MemorySizes;

    fn config(memory_sizes: Option<MemorySizes>) -> ModelConfig {
        ModelConfig {
            decoder_layer_count: 12,
            hidden_size: 768,
            vocab_size: 50257,
            end_of_text_token: 50256,
            memory_sizes,
        }
    }

    #[test]
    fn configured_sizes_win() {
        let sizes = MemorySizes {
            head_mib: 100,
            attention_mib: 9,
            feed_forward_mib: 18,
        };
        let costs = costs_for(&config(Some(sizes)), &DimensionCostModel);
        assert_eq!(costs.head_bytes, 100 * 1024 * 1024);
        assert_eq!(costs.attention_bytes, 9 * 1024 * 1024);
    }

    #[test]
    fn estimate_scales_with_dimensions() {
        let costs = costs_for(&config(None), &DimensionCostModel);
        assert_eq!(costs.attention_bytes, 4 * 768 * 768 * 4);
        assert_eq!(costs.feed_forward_bytes, 2 * costs.attention_bytes);
        assert!(costs.head_bytes > costs.attention_bytes);
    }
}
